use std::sync::Mutex;
use futures::channel::mpsc::Sender;
use log::debug;

pub type Handler<T> = Box<dyn Fn(T) + Send + Sync>;

pub enum Sink<T> {
    Handler(Handler<T>),
    Channel(Sender<T>),
}

/// Registered receivers of one kind of event.
///
/// Every event is delivered to every sink in registration order. Handlers run inline on the
/// dispatching task. Channels never block it: an event is dropped for a channel that is full,
/// and a channel whose receiver is gone is unregistered.
///
/// Handlers must not register new sinks on the same `Sinks`.
pub struct Sinks<T> {
    what: &'static str,
    sinks: Mutex<Vec<Sink<T>>>,
}

impl<T: Clone> Sinks<T> {
    pub fn new(what: &'static str) -> Self {
        Sinks { what, sinks: Mutex::new(Vec::new()) }
    }

    pub fn add(&self, sink: Sink<T>) {
        self.sinks.lock().expect("Failed to lock sinks").push(sink);
    }

    pub fn dispatch(&self, event: T) {
        let mut sinks = self.sinks.lock().expect("Failed to lock sinks");

        sinks.retain_mut(|sink| match sink {
            Sink::Handler(handler) => {
                handler(event.clone());
                true
            },
            Sink::Channel(sender) => match sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(err) if err.is_full() => {
                    debug!("Dropping {} update, channel is full", self.what);
                    true
                },
                Err(_) => {
                    debug!("Removing {} channel, receiver is gone", self.what);
                    false
                },
            },
        });
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().expect("Failed to lock sinks").len()
    }
}
