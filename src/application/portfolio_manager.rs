//! Portfolio Manager
//!
//! Drives one recommendation run for one wallet:
//! 1. COLLECTING: market and wallet fetched concurrently, each under a source
//!    timeout; the market batch is normalized and checked for staleness
//! 2. ANALYZING: every strategy assesses every candidate on its own task
//! 3. RECONCILING: vetoes removed, combined scores compared to holding,
//!    best move per source kept, then re-scored against the wallet as
//!    projected by the moves accepted before it
//! 4. RECOMMENDING: ISSUED with a plan, or REJECTED with reasons
//!
//! A newer version token on the watch channel, or an expired mandatory
//! snapshot, at any checkpoint ends the run STALE and aborts in-flight
//! analysis.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::domain::{
    AllocationRecommendation, CandidateMove, ExecutionStep, MarketSnapshot, MarketView, Placement,
    ProfileError, Producer, RecommendationStatus, RiskLevel, RiskProfile, Signal, TransitionError,
    WalletState,
};
use crate::ports::{
    AnalysisContext, Clock, MarketDataProvider, RiskParameters, SignalStrategy, WalletDataProvider,
    DEFAULT_RELIABILITY,
};
use crate::strategy::{MarketDataAggregator, RiskManager, YieldAnalyst};

use super::candidates::{self, CandidateGroup};
use super::state::{RunState, RunTrace};
use super::transaction_specialist::{PlanError, TransactionSpecialist};

/// Weights of the combined score
/// `combined = w_yield * normalized_yield - w_risk(level) * risk_score`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoringWeights {
    pub yield_weight: f64,
    pub risk_weight_low: f64,
    pub risk_weight_med: f64,
    pub risk_weight_high: f64,
}

impl ScoringWeights {
    pub fn risk_weight(&self, level: RiskLevel) -> f64 {
        match level {
            RiskLevel::Low => self.risk_weight_low,
            RiskLevel::Med => self.risk_weight_med,
            RiskLevel::High => self.risk_weight_high,
        }
    }

    pub fn combined(&self, level: RiskLevel, yield_score: f64, risk_score: f64) -> f64 {
        self.yield_weight * yield_score - self.risk_weight(level) * risk_score
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            yield_weight: 1.0,
            risk_weight_low: 1.0,
            risk_weight_med: 0.6,
            risk_weight_high: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OperationalRules {
    /// Destinations expected to yield less than this (APY %) are not eligible
    pub min_yield_pct: f64,
    /// Positions smaller than this are never moved
    pub min_position_size: f64,
    /// Positions holding less than this share of supplied value stay put
    pub min_position_allocation: f64,
    /// Cap on positions worth more than `large_position_usd`
    pub max_positions: usize,
    pub large_position_usd: f64,
}

impl Default for OperationalRules {
    fn default() -> Self {
        Self {
            min_yield_pct: 0.0,
            min_position_size: 1.0,
            min_position_allocation: 0.10,
            max_positions: 5,
            large_position_usd: 1000.0,
        }
    }
}

impl OperationalRules {
    /// Describes the breach when `after` holds more large positions than
    /// allowed and more than `before` did
    pub fn position_limit_breach(
        &self,
        before: &WalletState,
        after: &WalletState,
        market: &MarketView,
    ) -> Option<String> {
        let was = before.positions_above(self.large_position_usd, market);
        let now = after.positions_above(self.large_position_usd, market);
        (now > self.max_positions && now > was).then(|| {
            format!(
                "{} positions above ${:.0} exceeds limit of {}",
                now, self.large_position_usd, self.max_positions
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub run_timeout: Duration,
    pub source_timeout: Duration,
    pub snapshot_ttl: Duration,
    /// Protocols requested from the market provider
    pub protocols: Vec<String>,
    /// Protocols whose snapshots must be present and fresh
    pub mandatory_protocols: Vec<String>,
    /// Borrowed units per supplied unit on leveraged candidates; 0 disables
    pub leverage_ratio: f64,
    pub weights: ScoringWeights,
    pub rules: OperationalRules,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(30),
            source_timeout: Duration::from_secs(10),
            snapshot_ttl: Duration::from_secs(300),
            protocols: Vec::new(),
            mandatory_protocols: Vec::new(),
            leverage_ratio: 1.5,
            weights: ScoringWeights::default(),
            rules: OperationalRules::default(),
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.run_timeout.is_zero() || self.source_timeout.is_zero() {
            return Err(PipelineError::Configuration("timeouts must be positive".into()));
        }
        if self.source_timeout > self.run_timeout {
            return Err(PipelineError::Configuration(
                "source timeout exceeds run timeout".into(),
            ));
        }
        if self.snapshot_ttl.is_zero() {
            return Err(PipelineError::Configuration("snapshot TTL must be positive".into()));
        }
        if !self.leverage_ratio.is_finite() || self.leverage_ratio < 0.0 {
            return Err(PipelineError::Configuration(format!(
                "invalid leverage ratio {}",
                self.leverage_ratio
            )));
        }
        let w = &self.weights;
        if [w.yield_weight, w.risk_weight_low, w.risk_weight_med, w.risk_weight_high]
            .iter()
            .any(|x| !x.is_finite() || *x < 0.0)
        {
            return Err(PipelineError::Configuration("scoring weights must be non-negative".into()));
        }
        if !(w.risk_weight_low >= w.risk_weight_med && w.risk_weight_med >= w.risk_weight_high) {
            return Err(PipelineError::Configuration(
                "risk weight must not grow with risk level".into(),
            ));
        }
        if self.rules.min_position_size < 0.0 {
            return Err(PipelineError::Configuration("min_position_size must be >= 0".into()));
        }
        if !(0.0..1.0).contains(&self.rules.min_position_allocation) {
            return Err(PipelineError::Configuration(format!(
                "min_position_allocation must be in [0, 1), got {}",
                self.rules.min_position_allocation
            )));
        }
        if self.rules.max_positions == 0 || self.rules.large_position_usd < 0.0 {
            return Err(PipelineError::Configuration(
                "max_positions must be > 0 and large_position_usd >= 0".into(),
            ));
        }
        Ok(())
    }
}

/// Errors that stop a run before it can produce a recommendation
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Risk profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("State machine error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StalenessError {
    #[error("{0} source timed out")]
    SourceTimeout(String),

    #[error("{source_name} source unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("No snapshot for mandatory source {0}")]
    MissingSource(String),

    #[error("Snapshot for {placement} is {age_secs}s old (TTL {ttl_secs}s)")]
    Expired {
        placement: String,
        age_secs: i64,
        ttl_secs: u64,
    },

    #[error("Snapshot version {run} superseded by {latest}")]
    Superseded { run: u64, latest: u64 },

    #[error("Collection exceeded run timeout of {0:?}")]
    RunTimeout(Duration),
}

/// Why a run ended without issuing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RunCause {
    Stale(String),
    DataIntegrity(String),
    NoEligibleMove,
    OutflowViolation(String),
}

/// Scores of one assessed candidate, kept for audit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    #[serde(rename = "move")]
    pub mv: CandidateMove,
    /// Expected APY of the destination after the move
    pub expected_yield: f64,
    pub yield_score: f64,
    pub risk_score: f64,
    pub combined: f64,
    pub approved: bool,
    /// Knowledge-base reliability of the destination protocol
    pub reliability: f64,
    pub rationale: Vec<String>,
}

/// A move that survived the portfolio re-check. Both scores are taken
/// against the wallet as projected by the moves accepted before it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedMove {
    pub score: CandidateScore,
    pub hold: CandidateScore,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub recommendation: AllocationRecommendation,
    pub trace: RunTrace,
    pub cause: Option<RunCause>,
    pub plan: Vec<ExecutionStep>,
    /// Every candidate, scored against the collected wallet
    pub scores: Vec<CandidateScore>,
    pub accepted: Vec<AcceptedMove>,
    /// Placements of the wallet's assets, best expected yield first
    pub ranking: Vec<Signal>,
    /// Market records dropped by the aggregator
    pub rejected_records: usize,
}

impl RunReport {
    pub fn status(&self) -> RecommendationStatus {
        self.recommendation.status()
    }

    /// 0 issued, 2 data-integrity rejection, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        match (self.status(), &self.cause) {
            (RecommendationStatus::Issued, _) => 0,
            (_, Some(RunCause::DataIntegrity(_))) => 2,
            _ => 1,
        }
    }
}

enum Halt {
    Stale(StalenessError),
    Integrity(String),
    Outflow(String),
}

impl From<StalenessError> for Halt {
    fn from(e: StalenessError) -> Self {
        Halt::Stale(e)
    }
}

struct Decision {
    moves: Vec<CandidateMove>,
    yield_delta: f64,
    risk_delta: f64,
    reasons: Vec<String>,
}

#[derive(Default)]
struct RunScratch {
    scores: Vec<CandidateScore>,
    accepted: Vec<AcceptedMove>,
    ranking: Vec<Signal>,
    rejected_records: usize,
}

pub struct PortfolioManager {
    market: Arc<dyn MarketDataProvider>,
    wallet: Arc<dyn WalletDataProvider>,
    risk_parameters: Arc<dyn RiskParameters>,
    clock: Arc<dyn Clock>,
    aggregator: MarketDataAggregator,
    risk: Arc<RiskManager>,
    analyst: Arc<YieldAnalyst>,
    strategies: Vec<Arc<dyn SignalStrategy>>,
    specialist: TransactionSpecialist,
    settings: PipelineSettings,
    versions: watch::Receiver<u64>,
}

impl PortfolioManager {
    pub fn new(
        market: Arc<dyn MarketDataProvider>,
        wallet: Arc<dyn WalletDataProvider>,
        risk_parameters: Arc<dyn RiskParameters>,
        clock: Arc<dyn Clock>,
        yield_analyst: Arc<YieldAnalyst>,
        settings: PipelineSettings,
        versions: watch::Receiver<u64>,
    ) -> Self {
        let risk = Arc::new(RiskManager::new());
        let strategies: Vec<Arc<dyn SignalStrategy>> = vec![risk.clone(), yield_analyst.clone()];
        Self {
            market,
            wallet,
            risk_parameters,
            clock,
            aggregator: MarketDataAggregator::new(),
            risk,
            analyst: yield_analyst,
            strategies,
            specialist: TransactionSpecialist::new(),
            settings,
            versions,
        }
    }

    /// Adds a strategy whose vetoes exclude candidates
    pub fn with_strategy(mut self, strategy: Arc<dyn SignalStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn run(&self, wallet_id: &str, level: RiskLevel) -> Result<RunReport, PipelineError> {
        self.settings.validate()?;
        let profile = self.risk_parameters.load(level)?;
        profile.validate()?;

        let mut recommendation = AllocationRecommendation::pending(wallet_id, level, self.clock.now());
        let mut trace = RunTrace::new();
        let mut scratch = RunScratch::default();

        tracing::info!(
            "Starting run {} for wallet {} at risk level {}",
            recommendation.id(),
            wallet_id,
            level
        );

        let outcome = self
            .drive(wallet_id, &profile, &mut recommendation, &mut trace, &mut scratch)
            .await;

        let mut plan = Vec::new();
        let cause = match outcome {
            Ok(Some(decision)) => {
                for reason in decision.reasons {
                    recommendation.add_reason(reason)?;
                }
                recommendation.issue(decision.moves, decision.yield_delta, decision.risk_delta)?;
                trace.advance(RunState::Issued)?;
                plan = self.specialist.plan(&recommendation)?;
                None
            }
            Ok(None) => {
                trace.advance(RunState::Rejected)?;
                Some(RunCause::NoEligibleMove)
            }
            Err(Halt::Stale(e)) => {
                tracing::warn!("Run {} stale: {}", recommendation.id(), e);
                recommendation.mark_stale(e.to_string())?;
                trace.advance(RunState::Stale)?;
                Some(RunCause::Stale(e.to_string()))
            }
            Err(Halt::Integrity(reason)) => {
                tracing::warn!("Run {} rejected on data integrity: {}", recommendation.id(), reason);
                recommendation.reject(vec![reason.clone()])?;
                trace.advance(RunState::Rejected)?;
                Some(RunCause::DataIntegrity(reason))
            }
            Err(Halt::Outflow(reason)) => {
                recommendation.reject(vec![reason.clone()])?;
                trace.advance(RunState::Rejected)?;
                Some(RunCause::OutflowViolation(reason))
            }
        };

        tracing::info!(
            "Run {} finished {} with {} moves (yield delta {:+.3}%, risk delta {:+.3})",
            recommendation.id(),
            recommendation.status(),
            recommendation.moves().len(),
            recommendation.expected_yield_delta(),
            recommendation.risk_delta()
        );

        Ok(RunReport {
            recommendation,
            trace,
            cause,
            plan,
            scores: scratch.scores,
            accepted: scratch.accepted,
            ranking: scratch.ranking,
            rejected_records: scratch.rejected_records,
        })
    }

    /// Returns the moves to issue, or None after recording rejection reasons
    async fn drive(
        &self,
        wallet_id: &str,
        profile: &RiskProfile,
        recommendation: &mut AllocationRecommendation,
        trace: &mut RunTrace,
        scratch: &mut RunScratch,
    ) -> Result<Option<Decision>, Halt> {
        // COLLECTING
        let run_timeout = self.settings.run_timeout;
        let (market, wallet) =
            tokio::time::timeout(run_timeout, self.collect(wallet_id, recommendation, scratch))
                .await
                .map_err(|_| StalenessError::RunTimeout(run_timeout))??;
        self.checkpoint(&market, &wallet)?;
        advance(trace, RunState::Analyzing)?;

        // ANALYZING
        let groups = candidates::generate(
            &wallet,
            &market,
            &self.settings.rules,
            self.settings.leverage_ratio,
        );
        scratch.ranking = self.rank_holdings(&market, &wallet);
        let ctx = Arc::new(AnalysisContext {
            market,
            wallet,
            profile: profile.clone(),
        });
        let signals = self.analyze(&groups, ctx.clone()).await?;
        self.checkpoint(&ctx.market, &ctx.wallet)?;
        advance(trace, RunState::Reconciling)?;

        // RECONCILING
        let (chosen, mut reasons) = self.reconcile(&groups, &signals, profile.level, scratch);
        let (accepted, mut recheck_reasons) = self.recheck(&chosen, &ctx);
        reasons.append(&mut recheck_reasons);
        scratch.accepted = accepted.clone();
        self.checkpoint(&ctx.market, &ctx.wallet)?;
        advance(trace, RunState::Recommending)?;

        // RECOMMENDING
        self.guard_outflows(&accepted, &ctx.wallet)?;

        if accepted.is_empty() {
            if groups.is_empty() {
                reasons.push(format!(
                    "No supplied position of at least {} to move",
                    self.settings.rules.min_position_size
                ));
            }
            reasons.push("No candidate move beats holding the current allocation".into());
            recommendation
                .reject(reasons)
                .map_err(|e| Halt::Integrity(e.to_string()))?;
            return Ok(None);
        }

        let (yield_delta, risk_delta) = deltas(&accepted, &ctx);
        Ok(Some(Decision {
            moves: accepted.into_iter().map(|a| a.score.mv).collect(),
            yield_delta,
            risk_delta,
            reasons,
        }))
    }

    async fn collect(
        &self,
        wallet_id: &str,
        recommendation: &mut AllocationRecommendation,
        scratch: &mut RunScratch,
    ) -> Result<(MarketView, WalletState), Halt> {
        let timeout = self.settings.source_timeout;
        let (market_res, wallet_res) = tokio::join!(
            tokio::time::timeout(timeout, self.market.fetch(&self.settings.protocols)),
            tokio::time::timeout(timeout, self.wallet.fetch(wallet_id)),
        );

        let raw = match market_res {
            Err(_) => return Err(StalenessError::SourceTimeout("market".into()).into()),
            Ok(Err(e)) => {
                return Err(StalenessError::SourceUnavailable {
                    source_name: "market".into(),
                    reason: e.to_string(),
                }
                .into())
            }
            Ok(Ok(raw)) => raw,
        };
        let positions = match wallet_res {
            Err(_) => return Err(StalenessError::SourceTimeout("wallet".into()).into()),
            Ok(Err(e)) => {
                return Err(StalenessError::SourceUnavailable {
                    source_name: "wallet".into(),
                    reason: e.to_string(),
                }
                .into())
            }
            Ok(Ok(positions)) => positions,
        };

        let wallet = WalletState::new(wallet_id, positions)
            .map_err(|e| Halt::Integrity(format!("wallet {}: {}", wallet_id, e)))?;
        tracing::debug!(
            "Collected {} positions for wallet {}",
            wallet.positions().len(),
            wallet.wallet_id()
        );

        let batch = self.aggregator.normalize(&raw).into_snapshot_batch();
        scratch.rejected_records = batch.rejected;
        recommendation
            .set_snapshot_version(batch.version)
            .map_err(|e| Halt::Integrity(e.to_string()))?;
        if batch.snapshots.is_empty() {
            return Err(Halt::Integrity(format!(
                "no usable market snapshots ({} records rejected)",
                batch.rejected
            )));
        }

        let market = MarketView::from_batch(&batch);
        let market = self.enforce_freshness(market, &wallet)?;
        Ok((market, wallet))
    }

    /// Fails on a missing or expired mandatory snapshot; drops expired
    /// optional ones
    fn enforce_freshness(&self, market: MarketView, wallet: &WalletState) -> Result<MarketView, Halt> {
        let now = self.clock.now();
        let mandatory = self.mandatory_sources(&market, wallet, now)?;

        let dropped: Vec<Placement> = market
            .snapshots()
            .filter(|s| !mandatory.contains(&s.placement()) && self.expired(s, now))
            .map(|s| s.placement())
            .collect();
        if dropped.is_empty() {
            return Ok(market);
        }
        for p in &dropped {
            tracing::warn!("Dropping expired snapshot {}", p);
        }
        Ok(market.without(&dropped))
    }

    fn expired(&self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> bool {
        snapshot.age(now).num_milliseconds() > self.settings.snapshot_ttl.as_millis() as i64
    }

    /// Every placement that must be present and fresh: the wallet's own plus
    /// all quotes of the mandatory protocols
    fn mandatory_sources(
        &self,
        market: &MarketView,
        wallet: &WalletState,
        now: DateTime<Utc>,
    ) -> Result<BTreeSet<Placement>, Halt> {
        let mut mandatory: BTreeSet<Placement> = wallet.placements();
        for protocol in &self.settings.mandatory_protocols {
            let quoted: Vec<Placement> = market
                .snapshots()
                .filter(|s| &s.protocol == protocol)
                .map(|s| s.placement())
                .collect();
            if quoted.is_empty() {
                return Err(StalenessError::MissingSource(protocol.clone()).into());
            }
            mandatory.extend(quoted);
        }

        for placement in &mandatory {
            let Some(snapshot) = market.get(placement) else {
                return Err(StalenessError::MissingSource(placement.to_string()).into());
            };
            if self.expired(snapshot, now) {
                return Err(StalenessError::Expired {
                    placement: placement.to_string(),
                    age_secs: snapshot.age(now).num_seconds(),
                    ttl_secs: self.settings.snapshot_ttl.as_secs(),
                }
                .into());
            }
        }
        Ok(mandatory)
    }

    /// Between phases: the batch must still be the latest and its mandatory
    /// snapshots still within TTL
    fn checkpoint(&self, market: &MarketView, wallet: &WalletState) -> Result<(), Halt> {
        self.check_version(market.version())?;
        self.mandatory_sources(market, wallet, self.clock.now())?;
        Ok(())
    }

    fn check_version(&self, run_version: u64) -> Result<(), Halt> {
        let latest = *self.versions.borrow();
        if latest > run_version {
            return Err(StalenessError::Superseded {
                run: run_version,
                latest,
            }
            .into());
        }
        Ok(())
    }

    /// Yield ranking of every quoted placement for the assets the wallet supplies
    fn rank_holdings(&self, market: &MarketView, wallet: &WalletState) -> Vec<Signal> {
        let held: BTreeSet<&str> = wallet.supplied().map(|p| p.asset.as_str()).collect();
        let snapshots: Vec<MarketSnapshot> = market
            .snapshots()
            .filter(|s| held.contains(s.asset.as_str()))
            .cloned()
            .collect();
        self.analyst.rank(&snapshots, wallet)
    }

    /// Assesses every candidate with every strategy, one task per candidate
    async fn analyze(
        &self,
        groups: &[CandidateGroup],
        ctx: Arc<AnalysisContext>,
    ) -> Result<HashMap<usize, Vec<Signal>>, Halt> {
        let run_version = ctx.market.version();
        let mut tasks = JoinSet::new();

        for (idx, mv) in groups.iter().flat_map(|g| g.all()).cloned().enumerate() {
            let ctx = ctx.clone();
            let strategies = self.strategies.clone();
            tasks.spawn(async move {
                let signals: Vec<Result<Signal, String>> = strategies
                    .iter()
                    .map(|s| {
                        s.assess(&mv, &ctx)
                            .map_err(|e| format!("{} could not assess {}: {}", s.name(), mv, e))
                    })
                    .collect();
                (idx, signals)
            });
        }

        let mut versions = self.versions.clone();
        let mut watching = true;
        let mut results: HashMap<usize, Vec<Signal>> = HashMap::new();
        let expected = self.strategies.len();

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((idx, signals))) => {
                        let mut ok = Vec::with_capacity(expected);
                        for s in signals {
                            match s {
                                Ok(signal) => ok.push(signal),
                                Err(e) => tracing::warn!("{}", e),
                            }
                        }
                        if ok.len() == expected {
                            results.insert(idx, ok);
                        }
                    }
                    Some(Err(e)) => tracing::error!("Strategy task failed: {}", e),
                    None => break,
                },
                changed = versions.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let latest = *versions.borrow_and_update();
                    if latest > run_version {
                        tasks.abort_all();
                        return Err(StalenessError::Superseded { run: run_version, latest }.into());
                    }
                }
            }
        }

        Ok(results)
    }

    /// Picks the best eligible move per source. Returns (move, hold) score
    /// pairs in order of improvement over holding, and the reasons others
    /// were dropped.
    fn reconcile(
        &self,
        groups: &[CandidateGroup],
        signals: &HashMap<usize, Vec<Signal>>,
        level: RiskLevel,
        scratch: &mut RunScratch,
    ) -> (Vec<(CandidateScore, CandidateScore)>, Vec<String>) {
        let weights = self.settings.weights;
        let mut reasons = Vec::new();
        let mut chosen = Vec::new();
        let mut idx = 0;

        for group in groups {
            let mut scored: Vec<Option<CandidateScore>> = Vec::new();
            for mv in group.all() {
                let score = signals
                    .get(&idx)
                    .map(|sigs| score_candidate(mv, sigs, &weights, level));
                if let Some(s) = &score {
                    tracing::debug!(
                        "Candidate {}: yield={:.3}% risk={:.3} combined={:.4} approved={}",
                        s.mv,
                        s.expected_yield,
                        s.risk_score,
                        s.combined,
                        s.approved
                    );
                    scratch.scores.push(s.clone());
                }
                scored.push(score);
                idx += 1;
            }

            let mut iter = scored.into_iter();
            let Some(Some(hold)) = iter.next() else {
                reasons.push(format!("{}: holding could not be assessed", group.hold));
                continue;
            };

            let mut best: Option<CandidateScore> = None;
            for (mv, score) in group.moves.iter().zip(iter) {
                let Some(score) = score else {
                    reasons.push(format!("{}: missing signals", mv));
                    continue;
                };
                if !score.approved {
                    tracing::warn!("Vetoed {}: {}", mv, score.rationale.join("; "));
                    reasons.push(format!("{}: {}", mv, score.rationale.join("; ")));
                    continue;
                }
                if score.expected_yield < self.settings.rules.min_yield_pct {
                    reasons.push(format!(
                        "{}: expected yield {:.2}% below minimum {:.2}%",
                        mv, score.expected_yield, self.settings.rules.min_yield_pct
                    ));
                    continue;
                }
                if score.combined <= hold.combined {
                    reasons.push(format!(
                        "{}: combined score {:.4} does not beat holding ({:.4})",
                        mv, score.combined, hold.combined
                    ));
                    continue;
                }
                best = match best.take() {
                    None => Some(score),
                    Some(current) if prefer(&score, &current) == Ordering::Less => {
                        reasons.push(format!("{}: outranked by {}", current.mv, score.mv));
                        Some(score)
                    }
                    Some(current) => {
                        reasons.push(format!("{}: outranked by {}", score.mv, current.mv));
                        Some(current)
                    }
                };
            }

            if let Some(b) = best {
                chosen.push((b, hold));
            }
        }

        chosen.sort_by(|(a, a_hold), (b, b_hold)| {
            (b.combined - b_hold.combined)
                .partial_cmp(&(a.combined - a_hold.combined))
                .unwrap_or(Ordering::Equal)
        });
        (chosen, reasons)
    }

    /// Re-scores chosen moves, and the holds they replace, against the
    /// wallet as projected by the moves already accepted. A move must still
    /// pass the risk checks and the position limit, and still beat holding.
    fn recheck(
        &self,
        chosen: &[(CandidateScore, CandidateScore)],
        ctx: &AnalysisContext,
    ) -> (Vec<AcceptedMove>, Vec<String>) {
        let weights = self.settings.weights;
        let level = ctx.profile.level;
        let mut projected = ctx.wallet.clone();
        let mut accepted = Vec::new();
        let mut reasons = Vec::new();

        for (score, hold) in chosen {
            let verdict = self.risk.evaluate(&score.mv, &projected, &ctx.market, &ctx.profile);
            if !verdict.approved {
                tracing::warn!("Dropping {} on portfolio re-check", score.mv);
                reasons.push(format!(
                    "{}: fails portfolio re-check: {}",
                    score.mv,
                    verdict.reasons.join("; ")
                ));
                continue;
            }

            let after = projected.apply(&score.mv);
            let breach = self
                .settings
                .rules
                .position_limit_breach(&projected, &after, &ctx.market);
            if let Some(breach) = breach {
                tracing::warn!("Dropping {}: {}", score.mv, breach);
                reasons.push(format!("{}: {}", score.mv, breach));
                continue;
            }

            let hold_verdict = self.risk.evaluate(&hold.mv, &projected, &ctx.market, &ctx.profile);
            let rescored = CandidateScore {
                risk_score: verdict.risk_score,
                combined: weights.combined(level, score.yield_score, verdict.risk_score),
                ..score.clone()
            };
            let hold_rescored = CandidateScore {
                risk_score: hold_verdict.risk_score,
                combined: weights.combined(level, hold.yield_score, hold_verdict.risk_score),
                ..hold.clone()
            };
            if rescored.combined <= hold_rescored.combined {
                tracing::warn!("Dropping {}: no longer beats holding", score.mv);
                reasons.push(format!(
                    "{}: combined score {:.4} does not beat holding ({:.4}) after earlier moves",
                    score.mv, rescored.combined, hold_rescored.combined
                ));
                continue;
            }

            projected = after;
            accepted.push(AcceptedMove {
                score: rescored,
                hold: hold_rescored,
            });
        }
        (accepted, reasons)
    }

    fn guard_outflows(&self, accepted: &[AcceptedMove], wallet: &WalletState) -> Result<(), Halt> {
        let mut outflows: HashMap<&str, f64> = HashMap::new();
        for s in accepted.iter().map(|a| &a.score).filter(|s| s.mv.from != s.mv.to) {
            *outflows.entry(s.mv.from.asset.as_str()).or_insert(0.0) += s.mv.amount;
        }
        for (asset, total) in outflows {
            let balance = wallet.balance(asset);
            if total > balance + 1e-9 {
                return Err(Halt::Outflow(format!(
                    "outflow of {} {} exceeds supplied balance {}",
                    total, asset, balance
                )));
            }
        }
        Ok(())
    }
}

fn advance(trace: &mut RunTrace, next: RunState) -> Result<(), Halt> {
    trace
        .advance(next)
        .map_err(|e| Halt::Integrity(e.to_string()))
}

/// Merges all signals for one candidate into a score. Yield is the
/// confidence-weighted mean of yield signals, risk the worst risk signal;
/// any disapproval vetoes.
fn score_candidate(
    mv: &CandidateMove,
    signals: &[Signal],
    weights: &ScoringWeights,
    level: RiskLevel,
) -> CandidateScore {
    let yields: Vec<&Signal> = signals.iter().filter(|s| s.producer == Producer::Yield).collect();
    let conf_total: f64 = yields.iter().map(|s| s.confidence.max(f64::EPSILON)).sum();
    let (yield_score, expected_yield) = if yields.is_empty() {
        (0.0, 0.0)
    } else {
        yields.iter().fold((0.0, 0.0), |(score, value), s| {
            let w = s.confidence.max(f64::EPSILON) / conf_total;
            (score + w * s.score, value + w * s.value)
        })
    };
    let risk_score = signals
        .iter()
        .filter(|s| s.producer == Producer::Risk)
        .map(|s| s.score)
        .fold(0.0, f64::max);
    let reliability = yields
        .iter()
        .filter_map(|s| s.reliability)
        .reduce(f64::min)
        .unwrap_or(DEFAULT_RELIABILITY);

    CandidateScore {
        mv: mv.clone(),
        expected_yield,
        yield_score,
        risk_score,
        combined: weights.combined(level, yield_score, risk_score),
        approved: signals.iter().all(|s| s.approved),
        reliability,
        rationale: signals.iter().flat_map(|s| s.rationale.iter().cloned()).collect(),
    }
}

/// Higher combined, then higher yield, then more reliable protocol, then
/// protocol name, then unleveraged
fn prefer(a: &CandidateScore, b: &CandidateScore) -> Ordering {
    b.combined
        .partial_cmp(&a.combined)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.expected_yield
                .partial_cmp(&a.expected_yield)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.reliability.partial_cmp(&a.reliability).unwrap_or(Ordering::Equal))
        .then_with(|| a.mv.to.protocol.cmp(&b.mv.to.protocol))
        .then_with(|| a.mv.is_leveraged().cmp(&b.mv.is_leveraged()))
}

/// Value-weighted yield and risk change of the accepted moves, relative to
/// holding each source in the projected wallet
fn deltas(accepted: &[AcceptedMove], ctx: &AnalysisContext) -> (f64, f64) {
    let total = ctx.wallet.supplied_value(&ctx.market);
    if total <= 0.0 {
        return (0.0, 0.0);
    }

    accepted.iter().fold((0.0, 0.0), |(yield_delta, risk_delta), AcceptedMove { score: s, hold }| {
        let price = ctx.market.price(&s.mv.from.asset).unwrap_or(0.0);
        let weight = s.mv.amount * price / total;
        (
            yield_delta + weight * (s.expected_yield - hold.expected_yield),
            risk_delta + weight * (s.risk_score - hold.risk_score),
        )
    })
}
