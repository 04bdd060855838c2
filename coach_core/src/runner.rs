//! Serialized execution context for a session.
//!
//! Clock ticks, remote commands and local user actions are all funnelled
//! through one `mpsc` channel and applied to the engine in arrival order,
//! so no two mutations ever interleave.

use crate::clock::{ThreadClock, TimerToken};
use crate::commands::Acknowledgment;
use crate::engine::{Collaborators, EngineConfig, SessionEngine};
use crate::types::{EndReason, SessionState};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Tick(TimerToken),
    /// Raw command string from a paired device
    Remote {
        command: String,
        correlation_id: String,
    },
    CompleteRest,
    End(EndReason),
    Shutdown,
}

pub struct SessionRunner {
    engine: SessionEngine,
    events: Receiver<SessionEvent>,
    sender: Sender<SessionEvent>,
    acks: Option<Sender<Acknowledgment>>,
}

impl SessionRunner {
    /// Runner whose engine ticks in real time on a [`ThreadClock`]
    ///
    /// `collaborators` receives the clock and supplies everything else.
    pub fn new(
        config: EngineConfig,
        collaborators: impl FnOnce(ThreadClock) -> Collaborators,
    ) -> Self {
        let (sender, events) = mpsc::channel();
        let ticks = Mutex::new(sender.clone());
        let clock = ThreadClock::new(move |token| match ticks.lock() {
            Ok(ticks) => ticks.send(SessionEvent::Tick(token)).is_ok(),
            Err(_) => false,
        });

        let engine = SessionEngine::new(config, collaborators(clock));
        Self {
            engine,
            events,
            sender,
            acks: None,
        }
    }

    /// Runner around an engine whose clock is driven by the caller
    pub fn from_engine(engine: SessionEngine) -> Self {
        let (sender, events) = mpsc::channel();
        Self {
            engine,
            events,
            sender,
            acks: None,
        }
    }

    /// Send remote command acknowledgments to `acks`
    pub fn with_acks(mut self, acks: Sender<Acknowledgment>) -> Self {
        self.acks = Some(acks);
        self
    }

    /// A handle for posting events from other threads
    pub fn sender(&self) -> Sender<SessionEvent> {
        self.sender.clone()
    }

    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SessionEngine {
        &mut self.engine
    }

    /// Apply one event; returns false on shutdown
    pub fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Tick(token) => self.engine.on_tick(token),
            SessionEvent::Remote {
                command,
                correlation_id,
            } => {
                let ack = self.engine.dispatch_remote(&command, &correlation_id);
                if let Some(acks) = &self.acks {
                    if acks.send(ack).is_err() {
                        tracing::debug!("Acknowledgment receiver went away");
                    }
                }
            }
            SessionEvent::CompleteRest => {
                self.engine.complete_rest();
            }
            SessionEvent::End(reason) => {
                self.engine.end(reason);
            }
            SessionEvent::Shutdown => return false,
        }
        true
    }

    /// Process events until the active session ends or a shutdown arrives
    pub fn run_until_ended(&mut self) -> SessionState {
        while self.engine.phase().is_active() {
            // The runner holds a sender itself, so recv only fails if that
            // invariant is broken.
            let Ok(event) = self.events.recv() else {
                tracing::warn!("Event channel closed while a session was active");
                break;
            };
            if !self.handle(event) {
                tracing::debug!("Runner shut down");
                break;
            }
        }
        self.engine.state().clone()
    }
}
