//! Rebuild orchestration: the single-flight guard and the progress machine.
//!
//! One [`Orchestrator`] owns every piece of shared mutable state in the bot:
//! the global enable flag, the in-flight flag, and the role store. Commands
//! reach it through [`crate::commands`] on a single event stream; the rebuild
//! itself runs in a spawned task so other chat traffic is never starved, with
//! the in-flight flag as the only guard against a second concurrent attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::buildstep::BuildStep;
use crate::client::ChatHandle;
use crate::render;
use crate::roles::RoleStore;

/// Per-stage status. Strictly forward-moving within an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageStatus {
    NotStarted,
    InProgress,
    Complete,
}

/// The two stages of a rebuild attempt, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BuildClient,
    Hotpatch,
}

/// One rebuild attempt. Created when the guard admits a request, mutated in
/// place as stages advance, and discarded when the attempt ends.
#[derive(Debug, Clone)]
pub struct RebuildRequest {
    /// `{requester}-{unix_millis}`, fresh at admission time.
    pub request_id: String,
    pub requester: String,
    pub build_client: StageStatus,
    pub hotpatch: StageStatus,
}

impl RebuildRequest {
    pub fn new(request_id: impl Into<String>, requester: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            requester: requester.into(),
            build_client: StageStatus::NotStarted,
            hotpatch: StageStatus::NotStarted,
        }
    }

    /// Move a stage forward. Regressions are a bug in the caller.
    pub fn advance(&mut self, stage: Stage, status: StageStatus) {
        let slot = match stage {
            Stage::BuildClient => &mut self.build_client,
            Stage::Hotpatch => &mut self.hotpatch,
        };
        debug_assert!(status >= *slot, "stage status must not regress");
        *slot = status;
    }
}

/// Startup configuration for the orchestrator.
pub struct OrchestratorConfig {
    /// Normalized id of the single privileged administrator. Not a role
    /// store entry; supplied at startup.
    pub admin_id: String,
    /// Operations channel for status boxes and reload directives.
    pub channel: String,
}

/// Coordinator for all rebuild state. Cheap to share behind an `Arc`.
pub struct Orchestrator {
    pub config: OrchestratorConfig,
    pub(crate) handle: ChatHandle,
    pub(crate) roles: Mutex<RoleStore>,
    enabled: AtomicBool,
    in_flight: AtomicBool,
    build: Arc<dyn BuildStep>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        handle: ChatHandle,
        roles: RoleStore,
        build: Arc<dyn BuildStep>,
    ) -> Self {
        Self {
            config,
            handle,
            roles: Mutex::new(roles),
            enabled: AtomicBool::new(true),
            in_flight: AtomicBool::new(false),
            build,
        }
    }

    pub fn hotpatch_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the global enable flag and return the new value.
    pub fn toggle_enabled(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run one rebuild attempt for `requester`, end to end.
    ///
    /// Refusals (disabled, busy) are notices to the requester, not errors.
    /// Build or reload failures are caught here and reported generically;
    /// they never take the bot down. The in-flight flag is cleared on every
    /// exit path.
    pub async fn attempt_rebuild(&self, requester: &str) -> Result<()> {
        if !self.hotpatch_enabled() {
            info!(user = requester, "hotpatching disabled, refusing rebuild");
            return self
                .handle
                .pm(requester, "Hotpatching currently disabled")
                .await;
        }

        // Single atomic admit-or-reject: the loser of a race never starts a
        // second attempt.
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!(user = requester, "rebuild already in flight, refusing");
            return self
                .handle
                .pm(
                    requester,
                    "Hotpatch already in progress -- please wait and try again",
                )
                .await;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let request_id = format!("{requester}-{}", Utc::now().timestamp_millis());
        let mut request = RebuildRequest::new(&request_id, requester);
        info!(request_id = %request.request_id, user = requester, "rebuild admitted");

        if let Err(e) = self.run_stages(&mut request).await {
            warn!(request_id = %request.request_id, error = %e, "rebuild failed");
            self.handle
                .pm(
                    requester,
                    "Error while hotpatching, please contact an administrator",
                )
                .await?;
            return Ok(());
        }

        info!(request_id = %request.request_id, "rebuild complete");
        Ok(())
    }

    async fn run_stages(&self, request: &mut RebuildRequest) -> Result<()> {
        let channel = &self.config.channel;
        self.handle
            .pm(&request.requester, "Hotpatch request received -- on it!")
            .await?;
        self.broadcast(request).await;

        request.advance(Stage::BuildClient, StageStatus::InProgress);
        self.broadcast(request).await;

        info!(request_id = %request.request_id, "building client");
        let build = Arc::clone(&self.build);
        tokio::task::spawn_blocking(move || build.run())
            .await
            .context("build task panicked")?
            .context("build step failed")?;
        info!(request_id = %request.request_id, "client built");

        request.advance(Stage::BuildClient, StageStatus::Complete);
        self.broadcast(request).await;

        request.advance(Stage::Hotpatch, StageStatus::InProgress);
        self.broadcast(request).await;

        info!(request_id = %request.request_id, "sending reload directives");
        self.handle.room(channel, "/hotpatch formats,notify").await?;
        self.handle.room(channel, "/hotpatch chat,notify").await?;

        request.advance(Stage::Hotpatch, StageStatus::Complete);
        self.broadcast(request).await;
        Ok(())
    }

    /// Best-effort status update: a dropped send is logged, never fatal.
    async fn broadcast(&self, request: &RebuildRequest) {
        let line = render::update_line(&self.config.channel, request);
        if let Err(e) = self.handle.raw(&line).await {
            warn!(request_id = %request.request_id, error = %e, "failed to send status update");
        }
    }
}

/// Clears the in-flight flag when the attempt ends, success or failure.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildstep::BuildError;
    use crate::client::{self, Command};
    use tokio::sync::mpsc;

    struct FakeBuild {
        fail: bool,
        gate: Option<Mutex<std::sync::mpsc::Receiver<()>>>,
    }

    impl FakeBuild {
        fn ok() -> Self {
            Self {
                fail: false,
                gate: None,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                gate: None,
            }
        }

        /// Build that blocks until the returned sender fires.
        fn gated() -> (Self, std::sync::mpsc::Sender<()>) {
            let (tx, rx) = std::sync::mpsc::channel();
            (
                Self {
                    fail: false,
                    gate: Some(Mutex::new(rx)),
                },
                tx,
            )
        }
    }

    impl BuildStep for FakeBuild {
        fn run(&self) -> Result<(), BuildError> {
            if let Some(gate) = &self.gate {
                let _ = gate.lock().unwrap().recv();
            }
            if self.fail {
                Err(BuildError::Launch(std::io::Error::other("boom")))
            } else {
                Ok(())
            }
        }
    }

    fn orchestrator(build: FakeBuild) -> (Arc<Orchestrator>, mpsc::Receiver<Command>) {
        let (handle, rx) = client::test_pair();
        let orch = Orchestrator::new(
            OrchestratorConfig {
                admin_id: "staff".to_string(),
                channel: "lobby".to_string(),
            },
            handle,
            RoleStore::ephemeral(),
            Arc::new(build),
        );
        (Arc::new(orch), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Command>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(Command::Send(line)) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    fn snapshots(lines: &[String]) -> Vec<&String> {
        lines
            .iter()
            .filter(|l| l.starts_with("lobby|/adduhtml patch-"))
            .collect()
    }

    #[tokio::test]
    async fn successful_attempt_emits_full_sequence() {
        let (orch, mut rx) = orchestrator(FakeBuild::ok());
        orch.attempt_rebuild("bob").await.unwrap();

        let lines = drain(&mut rx);
        assert_eq!(lines.len(), 8, "pm + 5 snapshots + 2 directives: {lines:?}");
        assert_eq!(lines[0], "|/pm bob, Hotpatch request received -- on it!");
        assert_eq!(lines[5], "lobby|/hotpatch formats,notify");
        assert_eq!(lines[6], "lobby|/hotpatch chat,notify");

        // Stage icons advance monotonically across the five snapshots.
        let snaps = snapshots(&lines);
        assert_eq!(snaps.len(), 5);
        let icons: Vec<(usize, usize, usize)> = snaps
            .iter()
            .map(|s| {
                (
                    s.matches("🔲").count(),
                    s.matches("⏳").count(),
                    s.matches("✅").count(),
                )
            })
            .collect();
        assert_eq!(
            icons,
            vec![(2, 0, 0), (1, 1, 0), (1, 0, 1), (0, 1, 1), (0, 0, 2)]
        );
        assert!(!orch.in_flight());
    }

    #[tokio::test]
    async fn all_snapshots_target_the_same_display_key() {
        let (orch, mut rx) = orchestrator(FakeBuild::ok());
        orch.attempt_rebuild("bob").await.unwrap();

        let lines = drain(&mut rx);
        let keys: Vec<&str> = snapshots(&lines)
            .iter()
            .map(|s| s.split(',').next().unwrap())
            .collect();
        assert!(keys.iter().all(|k| *k == keys[0]), "{keys:?}");
        assert!(keys[0].starts_with("lobby|/adduhtml patch-bob-"));
    }

    #[tokio::test]
    async fn concurrent_request_is_refused_with_busy_notice() {
        let (build, release) = FakeBuild::gated();
        let (orch, mut rx) = orchestrator(build);

        let first = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.attempt_rebuild("bob").await })
        };
        // Wait for the first attempt to take the flag.
        while !orch.in_flight() {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        orch.attempt_rebuild("carol").await.unwrap();
        release.send(()).unwrap();
        first.await.unwrap().unwrap();

        let lines = drain(&mut rx);
        let busy: Vec<_> = lines
            .iter()
            .filter(|l| l.contains("already in progress"))
            .collect();
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0], "|/pm carol, Hotpatch already in progress -- please wait and try again");
        // Only the admitted attempt produced stage transitions.
        assert_eq!(snapshots(&lines).len(), 5);
        assert!(!orch.in_flight());
    }

    #[tokio::test]
    async fn disabled_refusal_creates_no_request() {
        let (orch, mut rx) = orchestrator(FakeBuild::ok());
        assert!(!orch.toggle_enabled());

        orch.attempt_rebuild("bob").await.unwrap();

        let lines = drain(&mut rx);
        assert_eq!(lines, vec!["|/pm bob, Hotpatching currently disabled"]);
        assert!(!orch.in_flight());
    }

    #[tokio::test]
    async fn build_failure_reports_and_clears_flag() {
        let (orch, mut rx) = orchestrator(FakeBuild::failing());
        orch.attempt_rebuild("bob").await.unwrap();

        let lines = drain(&mut rx);
        // pm + initial snapshot + in-progress snapshot + failure pm.
        assert_eq!(snapshots(&lines).len(), 2);
        assert!(lines.iter().all(|l| !l.contains("/hotpatch formats")));
        assert_eq!(
            lines.last().unwrap(),
            "|/pm bob, Error while hotpatching, please contact an administrator"
        );
        assert!(!orch.in_flight());
    }

    #[tokio::test]
    async fn toggle_flips_and_restores() {
        let (orch, _rx) = orchestrator(FakeBuild::ok());
        assert!(orch.hotpatch_enabled());
        assert!(!orch.toggle_enabled());
        assert!(orch.toggle_enabled());
        assert!(orch.hotpatch_enabled());
    }

    #[test]
    fn stage_status_never_regresses() {
        let mut request = RebuildRequest::new("bob-1", "bob");
        request.advance(Stage::BuildClient, StageStatus::InProgress);
        request.advance(Stage::BuildClient, StageStatus::Complete);
        assert_eq!(request.build_client, StageStatus::Complete);
        assert_eq!(request.hotpatch, StageStatus::NotStarted);
    }
}
