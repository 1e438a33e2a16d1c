//! Push-based distribution of sensor readings.
//!
//! A single background thread polls the driver and fans readings out to
//! registered subscribers. Each subscriber gets a dedicated dispatch
//! thread fed by an unbounded channel, so a slow handler delays neither
//! the polling loop nor other subscribers, while deliveries to one
//! subscriber stay in poll order.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nalgebra::Vector3;

use crate::device::Qmc5883l;
use crate::interface::Interface;
use crate::types::Qmc5883lError;

/// Poll interval while no subscriber is registered or the sensor is in
/// standby.
const IDLE_INTERVAL: Duration = Duration::from_secs(2);

/// Observer side of the reading stream.
///
/// `on_reading` is called once per emitted vector, in poll order.
/// `on_error` reports the overflow or transport failure that halted the
/// stream; `on_closed` is the terminal notification, delivered exactly
/// once to every subscriber still registered when the loop stops.
pub trait Subscriber: Send + Sync {
    fn on_reading(&self, reading: Vector3<f32>);

    fn on_error(&self, _error: Qmc5883lError) {}

    fn on_closed(&self) {}
}

enum Event {
    Reading(Vector3<f32>),
    Failure(Qmc5883lError),
    Closed,
}

struct Entry {
    id: u64,
    handler: Arc<dyn Subscriber>,
    tx: Sender<Event>,
}

struct State {
    entries: Vec<Entry>,
    next_id: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    /// Wakes the polling loop out of a sleep on subscribe or close.
    wake: Condvar,
}

/// Removes its subscriber from the fan-out set when dropped.
///
/// Dropping a handle after the broadcaster has shut down is a no-op.
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut state = shared.state.lock().unwrap();
            state.entries.retain(|entry| entry.id != self.id);
        }
    }
}

/// Fans sensor readings out to subscribers from a background polling loop.
///
/// The broadcaster takes ownership of the driver and is its sole caller
/// until [`Broadcaster::close`] hands it back.
pub struct Broadcaster<I> {
    shared: Arc<Shared>,
    handle: JoinHandle<Qmc5883l<I>>,
}

impl<I, E> Broadcaster<I>
where
    I: Interface<Error = E> + Send + 'static,
    E: Send + 'static,
    Qmc5883lError: From<E>,
{
    /// Starts the polling thread for the given driver.
    pub fn spawn(device: Qmc5883l<I>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                entries: Vec::new(),
                next_id: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });
        let loop_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || run_loop(device, loop_shared));
        Self { shared, handle }
    }

    /// Registers a subscriber and returns its removal handle.
    ///
    /// Subscribing an `Arc` that is already registered is a no-op and
    /// returns a handle to the existing registration. After shutdown the
    /// subscriber only receives `on_closed`.
    pub fn subscribe(&self, handler: Arc<dyn Subscriber>) -> Subscription {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(existing) = state
            .entries
            .iter()
            .find(|entry| Arc::ptr_eq(&entry.handler, &handler))
        {
            return Subscription {
                id: existing.id,
                shared: Arc::downgrade(&self.shared),
            };
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = mpsc::channel();
        spawn_dispatcher(Arc::clone(&handler), rx);
        if state.shutdown {
            let _ = tx.send(Event::Closed);
        } else {
            state.entries.push(Entry { id, handler, tx });
        }
        drop(state);
        self.shared.wake.notify_all();

        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().unwrap().entries.len()
    }

    /// Requests shutdown and waits for the polling loop to finish.
    ///
    /// Returns only after the loop thread has delivered the terminal
    /// notification to every subscriber and cleared the set; the driver is
    /// handed back for further use or release.
    pub fn close(self) -> Result<Qmc5883l<I>, Qmc5883lError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
        }
        self.shared.wake.notify_all();
        self.handle.join().map_err(|_| Qmc5883lError::TaskFailed)
    }
}

fn spawn_dispatcher(handler: Arc<dyn Subscriber>, rx: Receiver<Event>) {
    thread::spawn(move || {
        // Exits on Closed, or silently once the sender is dropped by an
        // unsubscribe.
        while let Ok(event) = rx.recv() {
            match event {
                Event::Reading(reading) => handler.on_reading(reading),
                Event::Failure(error) => handler.on_error(error),
                Event::Closed => {
                    handler.on_closed();
                    break;
                }
            }
        }
    });
}

fn run_loop<I, E>(mut device: Qmc5883l<I>, shared: Arc<Shared>) -> Qmc5883l<I>
where
    I: Interface<Error = E>,
    Qmc5883lError: From<E>,
{
    let interval = device.output_rate().interval();

    let failure: Option<Qmc5883lError> = 'poll: loop {
        {
            let state = shared.state.lock().unwrap();
            if state.shutdown {
                break 'poll None;
            }
            if state.entries.is_empty() || !device.is_active() {
                let _idle = shared.wake.wait_timeout(state, IDLE_INTERVAL).unwrap();
                continue 'poll;
            }
        }

        let status = match device.status() {
            Ok(status) => status,
            Err(error) => break 'poll Some(error),
        };

        if status.overflow() {
            break 'poll Some(Qmc5883lError::Overflow);
        }

        if status.data_skip() {
            // Discard the stale sample and re-poll immediately.
            log::debug!("data skip, discarding one sample");
            if let Err(error) = device.read_vector() {
                break 'poll Some(error);
            }
            continue 'poll;
        }

        if status.data_ready() {
            let reading = match device.read_vector() {
                Ok(reading) => reading,
                Err(error) => break 'poll Some(error),
            };
            let txs: Vec<Sender<Event>> = {
                let state = shared.state.lock().unwrap();
                state.entries.iter().map(|entry| entry.tx.clone()).collect()
            };
            for tx in txs {
                // A dispatcher that already went away is not our problem.
                let _ = tx.send(Event::Reading(reading));
            }
        }

        let state = shared.state.lock().unwrap();
        if !state.shutdown {
            let _pause = shared.wake.wait_timeout(state, interval).unwrap();
        }
    };

    if let Some(error) = failure {
        log::warn!("polling loop stopped: {error}");
    }

    // Terminal sequence. This runs strictly after the loop's last snapshot
    // of the subscriber set, so a notification can never race an emission.
    let mut state = shared.state.lock().unwrap();
    state.shutdown = true;
    for entry in state.entries.drain(..) {
        if let Some(error) = failure {
            let _ = entry.tx.send(Event::Failure(error));
        }
        let _ = entry.tx.send(Event::Closed);
    }
    drop(state);

    device
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputRate, Qmc5883lConfig};
    use crate::interface::mock::MockBus;
    use crate::types::Status;
    use std::time::Instant;

    #[derive(Debug, PartialEq, Clone, Copy)]
    enum Recorded {
        Reading(f32, f32, f32),
        Error(Qmc5883lError),
        Closed,
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Recorded>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Recorded> {
            self.events.lock().unwrap().clone()
        }

        fn wait_for_close(&self) -> Vec<Recorded> {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                let events = self.events();
                if events.contains(&Recorded::Closed) {
                    return events;
                }
                assert!(Instant::now() < deadline, "no terminal notification");
                thread::sleep(Duration::from_millis(5));
            }
        }
    }

    impl Subscriber for Recorder {
        fn on_reading(&self, reading: Vector3<f32>) {
            self.events
                .lock()
                .unwrap()
                .push(Recorded::Reading(reading.x, reading.y, reading.z));
        }

        fn on_error(&self, error: Qmc5883lError) {
            self.events.lock().unwrap().push(Recorded::Error(error));
        }

        fn on_closed(&self) {
            self.events.lock().unwrap().push(Recorded::Closed);
        }
    }

    fn fast_config() -> Qmc5883lConfig {
        Qmc5883lConfig {
            output_rate: OutputRate::Rate200,
            ..Qmc5883lConfig::default()
        }
    }

    #[test]
    fn skip_then_reading_then_overflow() {
        let bus = MockBus::new();
        let device = Qmc5883l::new(bus.clone(), fast_config()).unwrap();
        let broadcaster = Broadcaster::spawn(device);
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let _sub_a = broadcaster.subscribe(first.clone());
        let _sub_b = broadcaster.subscribe(second.clone());

        // Script the sensor only once both subscribers are registered, so
        // the loop polls an empty status (no flags) until this point.
        bus.push_axes(1, 2, 3); // stale sample, must be discarded
        bus.push_status(Status::DATA_SKIP);
        bus.push_axes(100, 0, 0);
        bus.push_status(Status::DATA_READY);
        bus.push_status(Status::OVERFLOW);

        for recorder in [&first, &second] {
            let events = recorder.wait_for_close();
            assert_eq!(
                events,
                vec![
                    Recorded::Reading(100.0, 0.0, 0.0),
                    Recorded::Error(Qmc5883lError::Overflow),
                    Recorded::Closed,
                ]
            );
        }

        // The loop already halted on its own; close still hands the driver
        // back.
        let device = broadcaster.close().unwrap();
        assert!(device.is_active());
    }

    #[test]
    fn transport_failure_is_reported_and_halts_the_loop() {
        let bus = MockBus::new();
        let device = Qmc5883l::new(bus.clone(), fast_config()).unwrap();
        // The loop does not touch the bus until a subscriber exists, so
        // the very first status poll hits the failure.
        bus.fail_reads();
        let broadcaster = Broadcaster::spawn(device);
        let recorder = Arc::new(Recorder::default());
        let _sub = broadcaster.subscribe(recorder.clone());

        let events = recorder.wait_for_close();
        assert_eq!(
            events,
            vec![
                Recorded::Error(Qmc5883lError::Interface),
                Recorded::Closed,
            ]
        );
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.close().unwrap();
    }

    #[test]
    fn subscribing_twice_keeps_one_entry() {
        let device = Qmc5883l::new(MockBus::new(), fast_config()).unwrap();
        let broadcaster = Broadcaster::spawn(device);
        let recorder: Arc<dyn Subscriber> = Arc::new(Recorder::default());

        let sub_a = broadcaster.subscribe(recorder.clone());
        let sub_b = broadcaster.subscribe(recorder.clone());
        assert_eq!(broadcaster.subscriber_count(), 1);

        drop(sub_a);
        assert_eq!(broadcaster.subscriber_count(), 0);
        drop(sub_b); // no-op
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.close().unwrap();
    }

    #[test]
    fn close_sends_exactly_one_terminal_notification() {
        let device = Qmc5883l::new(MockBus::new(), fast_config()).unwrap();
        let broadcaster = Broadcaster::spawn(device);
        let recorder = Arc::new(Recorder::default());
        let sub = broadcaster.subscribe(recorder.clone());

        let device = broadcaster.close().unwrap();
        assert!(device.is_active());

        let events = recorder.wait_for_close();
        assert_eq!(events, vec![Recorded::Closed]);

        // unsubscribing after shutdown is a no-op
        drop(sub);
    }

    #[test]
    fn unsubscribed_handler_receives_nothing_further() {
        let bus = MockBus::new();
        let device = Qmc5883l::new(bus.clone(), fast_config()).unwrap();
        let broadcaster = Broadcaster::spawn(device);
        let recorder = Arc::new(Recorder::default());
        let sub = broadcaster.subscribe(recorder.clone());
        drop(sub);
        assert_eq!(broadcaster.subscriber_count(), 0);

        bus.push_status(Status::DATA_READY);
        bus.push_axes(5, 5, 5);
        thread::sleep(Duration::from_millis(50));
        broadcaster.close().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(recorder.events().is_empty());
    }
}
