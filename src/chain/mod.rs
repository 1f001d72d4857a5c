//! Playback request chains.
//!
//! A chain is an ordered list of actions run against one [`PlaybackRequestContext`].
//! Each action either lets the chain proceed, suspends it until a [`ChainSignal`]
//! arrives, terminates it (optionally with an error) or completes it early. Exactly one
//! of those outcomes is produced per action, so a context is closed exactly once.

pub mod actions;
pub mod context;

use crate::error::PlaybackError;
use crate::events::{EventBus, PlaybackEvent};
use crate::lock;
use context::{ChainSignal, ContextRegistry, PlaybackRequestContext};
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Proceed,
    /// Park the context until a matching signal reaches [`PlaybackChainAction::resume`].
    Suspend,
    Terminate(Option<PlaybackError>),
    Complete,
}

pub trait PlaybackChainAction: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self, context: &mut PlaybackRequestContext) -> ActionOutcome;

    /// Continues a suspended run. Signals the action is not waiting for leave it suspended.
    fn resume(&self, context: &mut PlaybackRequestContext, signal: &ChainSignal) -> ActionOutcome {
        let _ = (context, signal);
        ActionOutcome::Suspend
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Completed,
    Suspended,
    Terminated(Option<PlaybackError>),
}

struct SuspendedRun {
    index: usize,
    context: PlaybackRequestContext,
}

pub struct PlaybackChain {
    name: &'static str,
    actions: Vec<Box<dyn PlaybackChainAction>>,
    contexts: ContextRegistry,
    events: EventBus,
    suspended: Mutex<Option<SuspendedRun>>,
}

impl PlaybackChain {
    pub fn new(name: &'static str, contexts: ContextRegistry, events: EventBus) -> Self {
        Self {
            name,
            actions: Vec::new(),
            contexts,
            events,
            suspended: Mutex::new(None),
        }
    }

    pub fn with_action(mut self, action: impl PlaybackChainAction + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn action_names(&self) -> Vec<&'static str> {
        self.actions.iter().map(|action| action.name()).collect()
    }

    pub fn is_suspended(&self) -> bool {
        lock(&self.suspended).is_some()
    }

    pub fn execute(&self, context: PlaybackRequestContext) -> ChainOutcome {
        if let Some(previous) = lock(&self.suspended).take() {
            debug!(
                chain = self.name,
                generation = previous.context.generation,
                "discarding suspended request"
            );
        }
        debug!(chain = self.name, generation = context.generation, "executing");
        self.run_from(context, 0)
    }

    /// Hands `signal` to the suspended action, if any is waiting on the same generation.
    /// Returns `None` when nothing in this chain was waiting for it.
    pub fn resume(&self, signal: &ChainSignal) -> Option<ChainOutcome> {
        let run = {
            let mut suspended = lock(&self.suspended);
            let run = suspended.take()?;
            if !self.contexts.is_current(&run.context) {
                debug!(
                    chain = self.name,
                    generation = run.context.generation,
                    "dropping superseded request"
                );
                return None;
            }
            if run.context.generation != signal.generation() {
                *suspended = Some(run);
                return None;
            }
            run
        };

        let SuspendedRun { index, mut context } = run;
        let action = &self.actions[index];
        debug!(chain = self.name, action = action.name(), "resuming");
        let outcome = action.resume(&mut context, signal);
        match self.settle(index, context, outcome) {
            Ok(finished) => Some(finished),
            Err((next, context)) => Some(self.run_from(context, next)),
        }
    }

    fn run_from(&self, mut context: PlaybackRequestContext, start: usize) -> ChainOutcome {
        let mut index = start;
        while index < self.actions.len() {
            let action = &self.actions[index];
            let outcome = action.execute(&mut context);
            match self.settle(index, context, outcome) {
                Ok(finished) => return finished,
                Err((next, proceeding)) => {
                    index = next;
                    context = proceeding;
                }
            }
        }
        self.complete(&context)
    }

    // Ok carries a final outcome; Err hands the context on to the next action.
    fn settle(
        &self,
        index: usize,
        context: PlaybackRequestContext,
        outcome: ActionOutcome,
    ) -> Result<ChainOutcome, (usize, PlaybackRequestContext)> {
        match outcome {
            ActionOutcome::Proceed => Err((index + 1, context)),
            ActionOutcome::Suspend => {
                debug!(
                    chain = self.name,
                    action = self.actions[index].name(),
                    awaiting = ?context.awaiting,
                    "suspended"
                );
                *lock(&self.suspended) = Some(SuspendedRun { index, context });
                Ok(ChainOutcome::Suspended)
            }
            ActionOutcome::Terminate(error) => Ok(self.terminate(&context, error)),
            ActionOutcome::Complete => Ok(self.complete(&context)),
        }
    }

    fn terminate(
        &self,
        context: &PlaybackRequestContext,
        error: Option<PlaybackError>,
    ) -> ChainOutcome {
        self.contexts.close(context);
        if let Some(error) = &error {
            warn!(chain = self.name, %error, "playback request failed");
            self.events.publish(PlaybackEvent::TrackNotPlayed {
                old_track: context.current_track.as_ref().map(|t| t.path.clone()),
                error: error.clone(),
            });
        } else {
            debug!(chain = self.name, generation = context.generation, "terminated");
        }
        ChainOutcome::Terminated(error)
    }

    fn complete(&self, context: &PlaybackRequestContext) -> ChainOutcome {
        self.contexts.close(context);
        info!(
            chain = self.name,
            track = ?context.requested_track.as_ref().map(|t| t.path.display().to_string()),
            "playback request completed"
        );
        ChainOutcome::Completed
    }
}
