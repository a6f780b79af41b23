//! Querier election state machine.
//!
//! One instance per VLAN. The machine is advanced only by the 1 Hz aging
//! tick and by received queries; lower source address wins the election per
//! RFC3376 section 6.6.2.

use crate::actions::EngineAction;
use crate::group::Seconds;
use crate::registry::QuerierConfig;
use log::{debug, info};
use mcast_types::{SourceAddr, VlanKey};
use serde::Serialize;

/// Election role of the instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuerierRole {
    #[default]
    Disabled,
    /// Startup phase: sending the startup query burst.
    Init,
    Querier,
    NonQuerier,
}

/// Per-instance querier state.
#[derive(Debug, Clone, Default)]
pub struct QuerierSm {
    role: QuerierRole,
    startup_queries_left: u8,
    next_query_at: Seconds,
    other_querier_expires: Seconds,
    other_querier: Option<SourceAddr>,
}

impl QuerierSm {
    pub fn role(&self) -> QuerierRole {
        self.role
    }

    /// The foreign querier currently holding the segment, if any.
    pub fn other_querier(&self) -> Option<SourceAddr> {
        self.other_querier
    }

    /// Advances the machine by one tick and emits query transmissions.
    pub fn tick(
        &mut self,
        vlan: VlanKey,
        config: &QuerierConfig,
        now: Seconds,
        actions: &mut Vec<EngineAction>,
    ) {
        if !config.enabled {
            if self.role != QuerierRole::Disabled {
                debug!("querier disabled on {}", vlan);
                *self = QuerierSm::default();
            }
            return;
        }

        if self.role == QuerierRole::Disabled {
            self.role = QuerierRole::Init;
            self.startup_queries_left = config.startup_query_count.max(1);
            self.next_query_at = now;
            info!("querier election started on {}", vlan);
        }

        match self.role {
            QuerierRole::Disabled => {}
            QuerierRole::Init => {
                if now >= self.next_query_at {
                    actions.push(EngineAction::SendQuery { vlan, group: None });
                    self.startup_queries_left = self.startup_queries_left.saturating_sub(1);
                    if self.startup_queries_left == 0 {
                        self.role = QuerierRole::Querier;
                        self.next_query_at = now + config.query_interval;
                        info!("assumed querier role on {}", vlan);
                    } else {
                        self.next_query_at = now + config.startup_query_interval();
                    }
                }
            }
            QuerierRole::Querier => {
                if now >= self.next_query_at {
                    actions.push(EngineAction::SendQuery { vlan, group: None });
                    self.next_query_at = now + config.query_interval;
                }
            }
            QuerierRole::NonQuerier => {
                if now >= self.other_querier_expires {
                    info!(
                        "other querier on {} timed out, resuming queries",
                        vlan
                    );
                    self.role = QuerierRole::Querier;
                    self.other_querier = None;
                    self.next_query_at = now;
                }
            }
        }
    }

    /// Handles a query observed on the segment.
    pub fn on_query_received(&mut self, src: SourceAddr, config: &QuerierConfig, now: Seconds) {
        if !config.enabled || self.role == QuerierRole::Disabled {
            return;
        }

        // Lower source address wins. Without a configured address the
        // instance always defers.
        let we_lose = match config.address {
            None => true,
            Some(ours) => src < ours,
        };
        if we_lose {
            if self.role != QuerierRole::NonQuerier {
                info!("deferring to querier {}", src);
            }
            self.role = QuerierRole::NonQuerier;
            self.other_querier = Some(src);
            self.other_querier_expires = now + config.other_querier_present_interval();
        }
    }
}
