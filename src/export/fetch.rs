//! Incremental fetch controller
//!
//! Tracks one pagination state machine per action:
//!
//! ```text
//! idle -> fetching -> (retrying)* -> drained | failed
//! ```
//!
//! Each call to [`FetchController::step`] issues at most one request per
//! in-flight action and returns, carrying the cursor and retry count in
//! [`ActionPhase`] until the next call. Nothing blocks across a full page
//! sequence.

use crate::error::ExportError;
use crate::posthog::message::Event;
use crate::posthog::{EventSource, PageRequest};
use metrics::{counter, increment_counter};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Bounded retry budget for page fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt of a page
    pub max_retries: u32,
    /// Fixed delay before each retry
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Pagination state of a single action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPhase {
    /// No cycle in flight
    Idle,
    /// Next page request is ready to be issued
    Fetching {
        /// Request for the next page
        request: PageRequest,
    },
    /// Last request failed; waiting for the backoff to elapse
    Retrying {
        /// Request to repeat
        request: PageRequest,
        /// Failed attempts so far for this page
        attempt: u32,
        /// Earliest time the retry may be issued
        retry_at: Instant,
    },
    /// Every page was fetched
    Drained,
    /// Retry budget exhausted
    Failed {
        /// Last error seen
        reason: String,
    },
}

impl ActionPhase {
    /// Whether the phase ends the action's part of the cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Drained | Self::Failed { .. })
    }
}

#[derive(Debug)]
struct ActionCursor {
    action_id: u64,
    phase: ActionPhase,
    buffer: Vec<Event>,
    pages: usize,
}

/// Final state of one action at the end of a cycle.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Action id
    pub action_id: u64,
    /// Pages successfully fetched
    pub pages: usize,
    /// Buffered events; empty for failed actions
    pub events: Vec<Event>,
    /// Failure reason when the action did not drain
    pub failure: Option<String>,
}

impl ActionOutcome {
    /// Whether the action drained.
    pub fn is_drained(&self) -> bool {
        self.failure.is_none()
    }
}

/// Drives paginated fetches for all tracked actions.
pub struct FetchController {
    source: Arc<dyn EventSource>,
    actions: Vec<ActionCursor>,
    policy: RetryPolicy,
    active: bool,
}

impl FetchController {
    /// Creates a controller for the given actions, all idle.
    pub fn new(source: Arc<dyn EventSource>, action_ids: &[u64], policy: RetryPolicy) -> Self {
        let actions = action_ids
            .iter()
            .map(|&action_id| ActionCursor {
                action_id,
                phase: ActionPhase::Idle,
                buffer: Vec::new(),
                pages: 0,
            })
            .collect();

        Self {
            source,
            actions,
            policy,
            active: false,
        }
    }

    /// True when no cycle is in flight.
    pub fn is_idle(&self) -> bool {
        !self.active
    }

    /// True when a cycle is in flight and every action is terminal.
    pub fn is_settled(&self) -> bool {
        self.active && self.actions.iter().all(|a| a.phase.is_terminal())
    }

    /// Current phase of an action.
    pub fn phase(&self, action_id: u64) -> Option<&ActionPhase> {
        self.actions
            .iter()
            .find(|a| a.action_id == action_id)
            .map(|a| &a.phase)
    }

    /// Starts a cycle bounded below by `watermark`.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::Fetch` if a cycle is already in flight.
    pub fn start(&mut self, watermark: &str) -> Result<(), ExportError> {
        if self.active {
            return Err(ExportError::Fetch(
                "a fetch cycle is already in flight".to_string(),
            ));
        }

        for action in &mut self.actions {
            action.buffer.clear();
            action.pages = 0;
            action.phase = ActionPhase::Fetching {
                request: PageRequest::first(action.action_id, watermark),
            };
        }
        self.active = true;
        info!(watermark, actions = self.actions.len(), "Started fetch cycle");
        Ok(())
    }

    /// Time until the next pending retry, when nothing can be issued now.
    ///
    /// Returns `None` if a request is ready or nothing is pending.
    pub fn time_until_ready(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut earliest: Option<Instant> = None;
        for action in &self.actions {
            match &action.phase {
                ActionPhase::Fetching { .. } => return None,
                ActionPhase::Retrying { retry_at, .. } => {
                    if *retry_at <= now {
                        return None;
                    }
                    earliest = Some(earliest.map_or(*retry_at, |e| e.min(*retry_at)));
                }
                _ => {}
            }
        }
        earliest.map(|at| at.saturating_duration_since(now))
    }

    /// Issues one request for every action that is ready.
    ///
    /// Pages of one action are processed strictly in order. Returns the
    /// number of requests issued.
    pub async fn step(&mut self) -> usize {
        if !self.active {
            return 0;
        }

        let now = Instant::now();
        let mut issued = 0;

        for action in &mut self.actions {
            let (request, attempt) = match &action.phase {
                ActionPhase::Fetching { request } => (request.clone(), 0),
                ActionPhase::Retrying {
                    request,
                    attempt,
                    retry_at,
                } if *retry_at <= now => (request.clone(), *attempt),
                _ => continue,
            };

            issued += 1;
            match self.source.fetch_page(&request).await {
                Ok(page) => {
                    counter!("gclid_export_events_fetched_total", page.results.len() as u64);
                    action.pages += 1;
                    action.buffer.extend(page.results);
                    action.phase = match page.next {
                        Some(next) => ActionPhase::Fetching {
                            request: PageRequest::Next(next),
                        },
                        None => {
                            debug!(
                                action_id = action.action_id,
                                pages = action.pages,
                                events = action.buffer.len(),
                                "Action drained"
                            );
                            ActionPhase::Drained
                        }
                    };
                }
                Err(e) => {
                    let attempt = attempt + 1;
                    if attempt > self.policy.max_retries {
                        warn!(
                            action_id = action.action_id,
                            attempts = attempt,
                            error = %e,
                            "Giving up on action for this cycle"
                        );
                        action.buffer.clear();
                        action.phase = ActionPhase::Failed {
                            reason: e.to_string(),
                        };
                    } else {
                        warn!(
                            action_id = action.action_id,
                            attempt,
                            max_retries = self.policy.max_retries,
                            error = %e,
                            "Page fetch failed; retrying"
                        );
                        increment_counter!("gclid_export_fetch_retries_total");
                        action.phase = ActionPhase::Retrying {
                            request,
                            attempt,
                            retry_at: Instant::now() + self.policy.backoff,
                        };
                    }
                }
            }
        }

        issued
    }

    /// Ends the cycle, returning every action's outcome and resetting all
    /// actions to idle.
    pub fn finish(&mut self) -> Vec<ActionOutcome> {
        self.active = false;
        self.actions
            .iter_mut()
            .map(|action| {
                let phase = std::mem::replace(&mut action.phase, ActionPhase::Idle);
                let events = std::mem::take(&mut action.buffer);
                let pages = std::mem::take(&mut action.pages);
                match phase {
                    ActionPhase::Drained => ActionOutcome {
                        action_id: action.action_id,
                        pages,
                        events,
                        failure: None,
                    },
                    ActionPhase::Failed { reason } => ActionOutcome {
                        action_id: action.action_id,
                        pages,
                        events: Vec::new(),
                        failure: Some(reason),
                    },
                    _ => ActionOutcome {
                        action_id: action.action_id,
                        pages,
                        events: Vec::new(),
                        failure: Some("cycle ended before the action settled".to_string()),
                    },
                }
            })
            .collect()
    }
}
