/*!
 * Intrinsic Rules
 *
 * Each rule is a pure function from a [`RuleContext`] to an optional
 * [`Tightening`]. Rules are folded in a fixed order: adj and state combine
 * with `min()`, the scheduling class with `max()`, capabilities with union.
 * A rule can only make a process more important than the fold so far.
 *
 * Rules read the running fold through `ctx.current`, which lets a rule
 * apply only while the process is still weaker than its floor.
 */

use super::config::{ms, TimingConfig};
use super::signals::GlobalSignals;
use crate::core::limits::*;
use crate::core::types::{Adj, Pid, Timestamp};
use crate::process::core::types::{
    ActivityState, Capability, ForegroundServiceKind, ProcState, SchedGroup, Score, WindowMode,
};
use crate::process::record::{ProcessSignals, ProcessTimes};
use std::time::Duration;

/// Inputs visible to every rule
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub pid: Pid,
    pub signals: &'a ProcessSignals,
    pub times: &'a ProcessTimes,
    /// Last committed score
    pub set: Score,
    pub last_state_time: Timestamp,
    pub globals: &'a GlobalSignals,
    pub timing: &'a TimingConfig,
    pub now: Timestamp,
    /// Raw values of the previous round while re-evaluating a cycle
    pub cycle_prev: Option<Score>,
    /// A client binds this process with treat-like-activity
    pub treat_like_activity: bool,
    /// The fold so far
    pub current: Score,
}

impl RuleContext<'_> {
    #[inline]
    pub fn is_top(&self) -> bool {
        self.globals.is_top(self.pid)
    }

    /// `since + window > now`, where a zero timestamp means never
    #[inline]
    pub fn within(&self, since: Timestamp, window: Duration) -> bool {
        since > 0 && since + ms(window) > self.now
    }
}

/// A floor proposed by one rule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tightening {
    pub adj: Option<Adj>,
    pub proc_state: Option<ProcState>,
    pub sched_group: Option<SchedGroup>,
    pub capability: Capability,
    pub reason: &'static str,
    pub follow_up_at: Option<Timestamp>,
    pub foreground_activities: bool,
    pub visible_activities: bool,
}

impl Tightening {
    #[inline]
    pub fn new(reason: &'static str) -> Self {
        Self {
            reason,
            ..Default::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn adj(mut self, adj: Adj) -> Self {
        self.adj = Some(adj);
        self
    }

    #[inline]
    #[must_use]
    pub fn state(mut self, state: ProcState) -> Self {
        self.proc_state = Some(state);
        self
    }

    #[inline]
    #[must_use]
    pub fn group(mut self, group: SchedGroup) -> Self {
        self.sched_group = Some(group);
        self
    }

    #[inline]
    #[must_use]
    pub fn cap(mut self, capability: Capability) -> Self {
        self.capability |= capability;
        self
    }

    #[inline]
    #[must_use]
    pub fn follow_up(mut self, at: Timestamp) -> Self {
        self.follow_up_at = Some(self.follow_up_at.map_or(at, |cur| cur.min(at)));
        self
    }

    /// Combine two floors into the tighter of both
    #[must_use]
    pub fn merge(mut self, other: Tightening) -> Self {
        let better_adj = match (self.adj, other.adj) {
            (Some(a), Some(b)) => b < a,
            (None, Some(_)) => true,
            _ => false,
        };
        if better_adj {
            self.reason = other.reason;
        }
        self.adj = min_opt(self.adj, other.adj);
        self.proc_state = min_opt(self.proc_state, other.proc_state);
        self.sched_group = max_opt(self.sched_group, other.sched_group);
        self.capability |= other.capability;
        if let Some(at) = other.follow_up_at {
            self = self.follow_up(at);
        }
        self.foreground_activities |= other.foreground_activities;
        self.visible_activities |= other.visible_activities;
        self
    }
}

fn min_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn max_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Running result of a rule fold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folded {
    pub score: Score,
    pub reason: &'static str,
    pub follow_up_at: Option<Timestamp>,
    pub foreground_activities: bool,
    pub visible_activities: bool,
}

impl Folded {
    /// Starting point for a process nobody has vouched for yet
    pub fn baseline(cached_adj_hint: Adj) -> Self {
        Self {
            score: Score::new(cached_adj_hint, ProcState::CachedEmpty, SchedGroup::Background),
            reason: "cch-empty",
            follow_up_at: None,
            foreground_activities: false,
            visible_activities: false,
        }
    }

    /// Fold one tightening; returns whether adj or state improved
    pub fn absorb(&mut self, t: &Tightening) -> bool {
        let mut improved = false;
        if let Some(adj) = t.adj.filter(|a| *a < self.score.adj) {
            self.score.adj = adj;
            improved = true;
        }
        if let Some(state) = t.proc_state.filter(|s| *s < self.score.proc_state) {
            self.score.proc_state = state;
            improved = true;
        }
        if let Some(group) = t.sched_group {
            self.score.sched_group = self.score.sched_group.max(group);
        }
        self.score.capability |= t.capability;
        if improved && !t.reason.is_empty() {
            self.reason = t.reason;
        }
        if let Some(at) = t.follow_up_at {
            self.follow_up_at = Some(self.follow_up_at.map_or(at, |cur| cur.min(at)));
        }
        self.foreground_activities |= t.foreground_activities;
        self.visible_activities |= t.visible_activities;
        improved
    }
}

pub type Rule = fn(&RuleContext<'_>) -> Option<Tightening>;

/// Rules applied before dependency edges are folded in
pub static INTRINSIC_RULES: &[(&str, Rule)] = &[
    ("top", top_app),
    ("remote-animation", remote_animation),
    ("instrumentation", instrumentation),
    ("receiver", receiver),
    ("exec-service", executing_service),
    ("top-sleeping", top_sleeping),
    ("activities", activities),
    ("recent-tasks", recent_tasks),
    ("foreground-service", foreground_service),
    ("top-to-fgs-grace", top_to_fgs_grace),
    ("almost-perceptible-grace", almost_perceptible_grace),
    ("force-important", force_important),
    ("heavy-weight", heavy_weight),
    ("home", home),
    ("previous", previous),
    ("cycle-merge", cycle_merge),
    ("backup", backup),
    ("started-services", started_services),
];

/// Rules applied after dependency edges
pub static LATE_RULES: &[(&str, Rule)] = &[
    ("external-provider", external_provider),
    ("recent-provider", recent_provider),
    ("cached-client", cached_client),
];

/// Fold `rules` into `folded`, keeping `ctx.current` in step with the fold
pub fn fold_rules(ctx: &mut RuleContext<'_>, rules: &[(&str, Rule)], folded: &mut Folded) {
    for (_, rule) in rules {
        ctx.current = folded.score;
        if let Some(t) = rule(ctx) {
            folded.absorb(&t);
        }
    }
    ctx.current = folded.score;
}

pub fn top_app(ctx: &RuleContext<'_>) -> Option<Tightening> {
    if !ctx.is_top() || !ctx.globals.awake {
        return None;
    }
    let mut t = Tightening::new("top-activity")
        .adj(FOREGROUND_APP_ADJ)
        .state(ProcState::Top)
        .group(SchedGroup::TopApp);
    t.foreground_activities = true;
    t.visible_activities = true;
    Some(t)
}

pub fn remote_animation(ctx: &RuleContext<'_>) -> Option<Tightening> {
    ctx.signals.running_remote_animation.then(|| {
        Tightening::new("running-remote-anim")
            .adj(VISIBLE_APP_ADJ)
            .state(ctx.globals.top_state())
            .group(SchedGroup::TopApp)
    })
}

pub fn instrumentation(ctx: &RuleContext<'_>) -> Option<Tightening> {
    ctx.signals.active_instrumentation.then(|| {
        Tightening::new("instrumentation")
            .adj(FOREGROUND_APP_ADJ)
            .state(ProcState::ForegroundService)
            .group(SchedGroup::Default)
            .cap(Capability::BFSL)
    })
}

pub fn receiver(ctx: &RuleContext<'_>) -> Option<Tightening> {
    ctx.signals.receiver.map(|group| {
        Tightening::new("broadcast")
            .adj(FOREGROUND_APP_ADJ)
            .state(ProcState::Receiver)
            .group(group)
    })
}

pub fn executing_service(ctx: &RuleContext<'_>) -> Option<Tightening> {
    ctx.signals.executing_service.map(|foreground| {
        let group = if foreground {
            SchedGroup::Default
        } else {
            SchedGroup::Background
        };
        Tightening::new("exec-service")
            .adj(FOREGROUND_APP_ADJ)
            .state(ProcState::Service)
            .group(group)
    })
}

pub fn top_sleeping(ctx: &RuleContext<'_>) -> Option<Tightening> {
    if !ctx.is_top() || ctx.globals.awake {
        return None;
    }
    let mut t = Tightening::new("top-sleeping")
        .adj(FOREGROUND_APP_ADJ)
        .state(ctx.globals.top_state())
        .group(SchedGroup::Background);
    t.foreground_activities = true;
    Some(t)
}

/// Tightest floor across every hosted activity
pub fn activities(ctx: &RuleContext<'_>) -> Option<Tightening> {
    if ctx.is_top() {
        return None;
    }
    let top_state = ctx.globals.top_state();
    ctx.signals
        .activities
        .iter()
        .map(|activity| activity_floor(ctx, *activity, top_state))
        .reduce(Tightening::merge)
}

fn activity_floor(ctx: &RuleContext<'_>, activity: ActivityState, top: ProcState) -> Tightening {
    match activity {
        ActivityState::Visible { window } => {
            let group = match window {
                WindowMode::Fullscreen => SchedGroup::Default,
                WindowMode::SplitOrFreeform => SchedGroup::TopApp,
                WindowMode::MultiWindow => SchedGroup::ForegroundWindow,
            };
            let mut t = Tightening::new("vis-activity")
                .adj(VISIBLE_APP_ADJ)
                .state(top)
                .group(group);
            t.foreground_activities = true;
            t.visible_activities = true;
            t
        }
        ActivityState::Paused => {
            let mut t = Tightening::new("pause-activity")
                .adj(PERCEPTIBLE_APP_ADJ)
                .state(top)
                .group(SchedGroup::Default);
            t.foreground_activities = true;
            t
        }
        ActivityState::Stopping { finishing } => {
            let mut t = Tightening::new("stop-activity").adj(PERCEPTIBLE_APP_ADJ);
            if !finishing {
                t = t.state(ProcState::LastActivity);
            }
            t.foreground_activities = true;
            t
        }
        ActivityState::Stopped { perceptible_since } => {
            let t = Tightening::new("cch-act").state(ProcState::CachedActivity);
            match perceptible_since {
                Some(since) if ctx.now.saturating_sub(since) < ms(ctx.timing.perceptible_task_timeout) => {
                    Tightening::new("perceptible-act")
                        .adj(PERCEPTIBLE_MEDIUM_APP_ADJ)
                        .state(ProcState::ImportantBackground)
                        .follow_up(since + ms(ctx.timing.perceptible_task_timeout))
                }
                Some(_) => Tightening::new("stale-perceptible-act")
                    .adj(PREVIOUS_APP_ADJ)
                    .state(ProcState::LastActivity)
                    .group(SchedGroup::Background),
                None => t,
            }
        }
    }
}

pub fn recent_tasks(ctx: &RuleContext<'_>) -> Option<Tightening> {
    (ctx.signals.has_recent_tasks && ctx.current.proc_state > ProcState::CachedRecent)
        .then(|| Tightening::new("cch-rec").state(ProcState::CachedRecent))
}

/// Foreground service or overlay floor, plus the capabilities of the service types
pub fn foreground_service(ctx: &RuleContext<'_>) -> Option<Tightening> {
    let fgs = ctx.signals.foreground_service;
    let mut t = match fgs {
        Some(service) => Tightening::new("").cap(service.types),
        None if ctx.signals.has_overlay_ui => Tightening::new(""),
        None => return None,
    };
    let weaker = ctx.current.adj > PERCEPTIBLE_APP_ADJ
        || ctx.current.proc_state > ProcState::ForegroundService;
    if !weaker {
        return Some(t);
    }
    t = match fgs.map(|s| s.kind) {
        Some(ForegroundServiceKind::Regular) => {
            let mut t = t.adj(PERCEPTIBLE_APP_ADJ).state(ProcState::ForegroundService);
            t.reason = "fg-service";
            t.cap(Capability::BFSL)
        }
        Some(ForegroundServiceKind::Short) => {
            let mut t = t
                .adj(PERCEPTIBLE_MEDIUM_APP_ADJ + 1)
                .state(ProcState::ForegroundService);
            t.reason = "fg-service-short";
            t
        }
        None => {
            let mut t = t.adj(PERCEPTIBLE_APP_ADJ).state(ProcState::ImportantForeground);
            t.reason = "has-overlay-ui";
            t
        }
    };
    Some(t.group(SchedGroup::Default))
}

fn recently_top(ctx: &RuleContext<'_>, grace: Duration) -> bool {
    ctx.within(ctx.times.last_top_time, grace) || ctx.set.proc_state <= ProcState::Top
}

pub fn top_to_fgs_grace(ctx: &RuleContext<'_>) -> Option<Tightening> {
    let service = ctx.signals.foreground_service?;
    let grace = ctx.timing.top_to_fgs_grace;
    if ctx.current.adj <= PERCEPTIBLE_RECENT_FOREGROUND_APP_ADJ || !recently_top(ctx, grace) {
        return None;
    }
    let t = match service.kind {
        ForegroundServiceKind::Regular => {
            Tightening::new("fg-service-act").adj(PERCEPTIBLE_RECENT_FOREGROUND_APP_ADJ)
        }
        ForegroundServiceKind::Short => {
            Tightening::new("fg-service-short-act").adj(PERCEPTIBLE_RECENT_FOREGROUND_APP_ADJ + 1)
        }
    };
    Some(t.follow_up(ctx.times.last_top_time + ms(grace)))
}

pub fn almost_perceptible_grace(ctx: &RuleContext<'_>) -> Option<Tightening> {
    let grace = ctx.timing.top_to_almost_perceptible_grace;
    let applies = ctx.signals.top_started_almost_perceptible
        && ctx.current.adj > PERCEPTIBLE_RECENT_FOREGROUND_APP_ADJ + 2
        && recently_top(ctx, grace);
    applies.then(|| {
        Tightening::new("top-ej-act")
            .adj(PERCEPTIBLE_RECENT_FOREGROUND_APP_ADJ + 2)
            .follow_up(ctx.times.last_top_time + ms(grace))
    })
}

pub fn force_important(ctx: &RuleContext<'_>) -> Option<Tightening> {
    let weaker = ctx.current.adj > PERCEPTIBLE_APP_ADJ
        || ctx.current.proc_state > ProcState::TransientBackground;
    (ctx.signals.force_important && weaker).then(|| {
        Tightening::new("force-imp")
            .adj(PERCEPTIBLE_APP_ADJ)
            .state(ProcState::TransientBackground)
            .group(SchedGroup::Default)
    })
}

pub fn heavy_weight(ctx: &RuleContext<'_>) -> Option<Tightening> {
    ctx.signals.heavy_weight.then(|| {
        Tightening::new("heavy")
            .adj(HEAVY_WEIGHT_APP_ADJ)
            .state(ProcState::HeavyWeight)
            .group(SchedGroup::Background)
    })
}

pub fn home(ctx: &RuleContext<'_>) -> Option<Tightening> {
    ctx.signals.home.then(|| {
        Tightening::new("home")
            .adj(HOME_APP_ADJ)
            .state(ProcState::Home)
            .group(SchedGroup::Background)
    })
}

/// The previous app keeps a floor for a while after it stops showing UI
pub fn previous(ctx: &RuleContext<'_>) -> Option<Tightening> {
    if !ctx.signals.previous || !ctx.signals.has_activities() {
        return None;
    }
    let max_previous = ms(ctx.timing.max_previous_time);
    let expired = ctx.current.proc_state >= ProcState::LastActivity
        && ctx.set.proc_state == ProcState::LastActivity
        && ctx.last_state_time + max_previous <= ctx.now;
    if expired {
        return Some(
            Tightening::new("previous-expired")
                .state(ProcState::LastActivity)
                .group(SchedGroup::Background),
        );
    }
    let since = if ctx.set.proc_state == ProcState::LastActivity {
        ctx.last_state_time
    } else {
        ctx.now
    };
    Some(
        Tightening::new("previous")
            .adj(PREVIOUS_APP_ADJ)
            .state(ProcState::LastActivity)
            .group(SchedGroup::Background)
            .follow_up(since + max_previous),
    )
}

/// Cycle re-evaluation never drops below the previous round
pub fn cycle_merge(ctx: &RuleContext<'_>) -> Option<Tightening> {
    ctx.cycle_prev.map(|prev| {
        Tightening::new("")
            .adj(prev.adj)
            .state(prev.proc_state)
            .group(prev.sched_group)
            .cap(prev.capability)
    })
}

pub fn backup(ctx: &RuleContext<'_>) -> Option<Tightening> {
    if !ctx.globals.is_backup_target(ctx.pid) {
        return None;
    }
    let mut t = Tightening::new("backup").state(ProcState::Backup);
    if ctx.current.adj > BACKUP_APP_ADJ {
        t = t.adj(BACKUP_APP_ADJ).state(ProcState::TransientBackground);
    }
    Some(t)
}

/// Started services keep a process warm while they stay active
pub fn started_services(ctx: &RuleContext<'_>) -> Option<Tightening> {
    let signals = ctx.signals;
    if !signals.started_services {
        return None;
    }
    let t = Tightening::new("started-services").state(ProcState::Service);
    if !signals.keep_warming && signals.has_shown_ui && !signals.home {
        return Some(t);
    }
    let inactivity = ctx.timing.max_service_inactivity;
    let active = signals.keep_warming || ctx.within(ctx.times.last_service_activity, inactivity);
    if active && !signals.sdk_sandbox && ctx.current.adj > SERVICE_ADJ {
        let mut t = t.adj(SERVICE_ADJ);
        if !signals.keep_warming {
            t = t.follow_up(ctx.times.last_service_activity + ms(inactivity));
        }
        return Some(t);
    }
    Some(t)
}

pub fn external_provider(ctx: &RuleContext<'_>) -> Option<Tightening> {
    ctx.signals.external_provider_handles.then(|| {
        Tightening::new("ext-provider")
            .adj(FOREGROUND_APP_ADJ)
            .state(ProcState::ImportantForeground)
            .group(SchedGroup::Default)
    })
}

pub fn recent_provider(ctx: &RuleContext<'_>) -> Option<Tightening> {
    let retain = ctx.timing.content_provider_retain;
    ctx.within(ctx.times.last_provider_time, retain).then(|| {
        Tightening::new("recent-provider")
            .adj(PREVIOUS_APP_ADJ)
            .state(ProcState::LastActivity)
            .group(SchedGroup::Background)
            .follow_up(ctx.times.last_provider_time + ms(retain))
    })
}

/// Cached processes serving activities elsewhere get a better cached state
pub fn cached_client(ctx: &RuleContext<'_>) -> Option<Tightening> {
    if ctx.current.proc_state < ProcState::CachedEmpty {
        return None;
    }
    if ctx.signals.has_client_activities {
        Some(Tightening::new("cch-client-act").state(ProcState::CachedActivityClient))
    } else if ctx.treat_like_activity {
        Some(Tightening::new("cch-as-act").state(ProcState::CachedActivity))
    } else {
        None
    }
}

/// CPU time allowance earned by the process itself
pub fn cpu_capability(signals: &ProcessSignals, foreground_activities: bool) -> Capability {
    let earns = signals.cpu_time_allowlisted
        || foreground_activities
        || signals.foreground_service.is_some()
        || signals.receiver.is_some()
        || signals.active_instrumentation;
    if earns {
        Capability::CPU_TIME
    } else {
        Capability::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::record::ForegroundService;
    use pretty_assertions::assert_eq;

    struct Fixture {
        signals: ProcessSignals,
        times: ProcessTimes,
        globals: GlobalSignals,
        timing: TimingConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                signals: ProcessSignals::default(),
                times: ProcessTimes::default(),
                globals: GlobalSignals::default(),
                timing: TimingConfig::default(),
            }
        }

        fn ctx(&self, now: Timestamp) -> RuleContext<'_> {
            RuleContext {
                pid: 1,
                signals: &self.signals,
                times: &self.times,
                set: Score::UNKNOWN,
                last_state_time: 0,
                globals: &self.globals,
                timing: &self.timing,
                now,
                cycle_prev: None,
                treat_like_activity: false,
                current: Folded::baseline(UNKNOWN_ADJ).score,
            }
        }

        fn fold(&self, now: Timestamp) -> Folded {
            let mut ctx = self.ctx(now);
            let mut folded = Folded::baseline(UNKNOWN_ADJ);
            fold_rules(&mut ctx, INTRINSIC_RULES, &mut folded);
            fold_rules(&mut ctx, LATE_RULES, &mut folded);
            folded
        }
    }

    #[test]
    fn test_baseline_is_empty() {
        let folded = Fixture::new().fold(1_000);
        assert_eq!(folded.score.adj, UNKNOWN_ADJ);
        assert_eq!(folded.score.proc_state, ProcState::CachedEmpty);
        assert_eq!(folded.reason, "cch-empty");
    }

    #[test]
    fn test_top_app_rule() {
        let mut fx = Fixture::new();
        fx.globals.top_app = Some(1);
        let t = top_app(&fx.ctx(0)).unwrap();
        assert_eq!(t.adj, Some(FOREGROUND_APP_ADJ));
        assert_eq!(t.proc_state, Some(ProcState::Top));
        assert_eq!(t.sched_group, Some(SchedGroup::TopApp));

        fx.globals.awake = false;
        assert!(top_app(&fx.ctx(0)).is_none());
        let t = top_sleeping(&fx.ctx(0)).unwrap();
        assert_eq!(t.proc_state, Some(ProcState::TopSleeping));
    }

    #[test]
    fn test_tightest_activity_wins() {
        let mut fx = Fixture::new();
        fx.signals.activities = vec![
            ActivityState::Stopped { perceptible_since: None },
            ActivityState::Paused,
            ActivityState::Visible { window: WindowMode::SplitOrFreeform },
        ];
        let t = activities(&fx.ctx(0)).unwrap();
        assert_eq!(t.adj, Some(VISIBLE_APP_ADJ));
        assert_eq!(t.proc_state, Some(ProcState::Top));
        assert_eq!(t.sched_group, Some(SchedGroup::TopApp));
        assert_eq!(t.reason, "vis-activity");
        assert!(t.visible_activities);
    }

    #[test]
    fn test_stopping_activity_keeps_last_activity_unless_finishing() {
        let mut fx = Fixture::new();
        fx.signals.activities = vec![ActivityState::Stopping { finishing: true }];
        let t = activities(&fx.ctx(0)).unwrap();
        assert_eq!(t.adj, Some(PERCEPTIBLE_APP_ADJ));
        assert_eq!(t.proc_state, None);

        fx.signals.activities = vec![ActivityState::Stopping { finishing: false }];
        let t = activities(&fx.ctx(0)).unwrap();
        assert_eq!(t.proc_state, Some(ProcState::LastActivity));
    }

    #[test]
    fn test_perceptible_task_expires() {
        let mut fx = Fixture::new();
        fx.signals.activities = vec![ActivityState::Stopped { perceptible_since: Some(1_000) }];
        let fresh = activities(&fx.ctx(2_000)).unwrap();
        assert_eq!(fresh.adj, Some(PERCEPTIBLE_MEDIUM_APP_ADJ));
        assert_eq!(fresh.follow_up_at, Some(61_000));

        let stale = activities(&fx.ctx(100_000)).unwrap();
        assert_eq!(stale.adj, Some(PREVIOUS_APP_ADJ));
        assert_eq!(stale.reason, "stale-perceptible-act");
    }

    #[test]
    fn test_short_service_has_no_bfsl() {
        let mut fx = Fixture::new();
        fx.signals.foreground_service = Some(ForegroundService {
            kind: ForegroundServiceKind::Short,
            types: Capability::empty(),
        });
        let t = foreground_service(&fx.ctx(0)).unwrap();
        assert_eq!(t.adj, Some(PERCEPTIBLE_MEDIUM_APP_ADJ + 1));
        assert!(!t.capability.contains(Capability::BFSL));

        fx.signals.foreground_service = Some(ForegroundService {
            kind: ForegroundServiceKind::Regular,
            types: Capability::LOCATION,
        });
        let t = foreground_service(&fx.ctx(0)).unwrap();
        assert_eq!(t.adj, Some(PERCEPTIBLE_APP_ADJ));
        assert_eq!(t.capability, Capability::BFSL | Capability::LOCATION);
    }

    #[test]
    fn test_top_to_fgs_grace_registers_follow_up() {
        let mut fx = Fixture::new();
        fx.signals.foreground_service = Some(ForegroundService {
            kind: ForegroundServiceKind::Regular,
            types: Capability::empty(),
        });
        fx.times.last_top_time = 10_000;
        let folded = fx.fold(12_000);
        assert_eq!(folded.score.adj, PERCEPTIBLE_RECENT_FOREGROUND_APP_ADJ);
        assert_eq!(folded.reason, "fg-service-act");
        assert_eq!(folded.follow_up_at, Some(25_000));

        let later = fx.fold(30_000);
        assert_eq!(later.score.adj, PERCEPTIBLE_APP_ADJ);
        assert_eq!(later.follow_up_at, None);
    }

    #[test]
    fn test_previous_expires_after_max_time() {
        let mut fx = Fixture::new();
        fx.signals.previous = true;
        fx.signals.activities = vec![ActivityState::Stopped { perceptible_since: None }];
        let mut ctx = fx.ctx(100_000);
        let t = previous(&ctx).unwrap();
        assert_eq!(t.adj, Some(PREVIOUS_APP_ADJ));
        assert_eq!(t.follow_up_at, Some(160_000));

        ctx.set = Score::new(PREVIOUS_APP_ADJ, ProcState::LastActivity, SchedGroup::Background);
        ctx.last_state_time = 10_000;
        ctx.current.proc_state = ProcState::CachedActivity;
        let t = previous(&ctx).unwrap();
        assert_eq!(t.reason, "previous-expired");
        assert_eq!(t.adj, None);
    }

    #[test]
    fn test_started_service_goes_stale() {
        let mut fx = Fixture::new();
        fx.signals.started_services = true;
        fx.times.last_service_activity = 5_000;
        let active = fx.fold(10_000);
        assert_eq!(active.score.adj, SERVICE_ADJ);
        assert_eq!(active.score.proc_state, ProcState::Service);

        let stale = fx.fold(5_000 + 31 * 60 * 1000);
        assert_eq!(stale.score.adj, UNKNOWN_ADJ);
        assert_eq!(stale.score.proc_state, ProcState::Service);
    }

    #[test]
    fn test_backup_target() {
        let mut fx = Fixture::new();
        fx.globals.backup_target = Some(1);
        let folded = fx.fold(0);
        assert_eq!(folded.score.adj, BACKUP_APP_ADJ);
        assert_eq!(folded.score.proc_state, ProcState::TransientBackground);
    }

    #[test]
    fn test_cycle_merge_never_loosens() {
        let fx = Fixture::new();
        let mut ctx = fx.ctx(0);
        ctx.cycle_prev = Some(Score::new(SERVICE_ADJ, ProcState::Service, SchedGroup::Default));
        let mut folded = Folded::baseline(UNKNOWN_ADJ);
        fold_rules(&mut ctx, INTRINSIC_RULES, &mut folded);
        assert_eq!(folded.score.adj, SERVICE_ADJ);
        assert_eq!(folded.score.sched_group, SchedGroup::Default);
    }

    #[test]
    fn test_cached_client_states() {
        let mut fx = Fixture::new();
        fx.signals.has_client_activities = true;
        assert_eq!(fx.fold(0).score.proc_state, ProcState::CachedActivityClient);

        fx.signals.has_client_activities = false;
        let mut ctx = fx.ctx(0);
        ctx.treat_like_activity = true;
        let t = cached_client(&ctx).unwrap();
        assert_eq!(t.proc_state, Some(ProcState::CachedActivity));
    }

    #[test]
    fn test_recent_provider_and_external_handles() {
        let mut fx = Fixture::new();
        fx.times.last_provider_time = 50_000;
        let folded = fx.fold(55_000);
        assert_eq!(folded.score.adj, PREVIOUS_APP_ADJ);
        assert_eq!(folded.follow_up_at, Some(70_000));

        fx.signals.external_provider_handles = true;
        let folded = fx.fold(55_000);
        assert_eq!(folded.score.adj, FOREGROUND_APP_ADJ);
        assert_eq!(folded.score.proc_state, ProcState::ImportantForeground);
    }

    #[test]
    fn test_absorb_only_tightens() {
        let mut folded = Folded::baseline(UNKNOWN_ADJ);
        assert!(folded.absorb(&Tightening::new("a").adj(SERVICE_ADJ)));
        assert!(!folded.absorb(&Tightening::new("b").adj(HOME_APP_ADJ)));
        assert_eq!(folded.score.adj, SERVICE_ADJ);
        assert_eq!(folded.reason, "a");
    }
}
