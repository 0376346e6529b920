//! kplane-placement: the placement decision pipeline.
//!
//! Given a workload request, the engine fetches candidate clusters,
//! scores them, evaluates placement policies, merges both signals into a
//! ranking, validates the proposal, applies operator overrides and
//! records the resulting decision.
//!
//! # Components
//!
//! - **`PlacementEngine`**: `decide(request, deadline)`, built from an
//!   `EngineConfig` plus injected collaborators
//! - **`Combiner`**: weighted-blend, policy-primary, scheduler-primary
//!   and consensus strategies behind `CombinationStrategy`
//! - **`Validator`**: structural, capacity, policy-compliance and
//!   affinity checks with typed conflicts
//! - **`OverrideManager`**: force/exclude/prefer/avoid resolution
//! - **`sources`**: `CandidateSupplier`, `PolicyStore`, `OverrideStore`
//!   and their static in-memory implementations

pub mod combiner;
pub mod engine;
pub mod overrides;
pub mod sources;
pub mod validator;

pub use combiner::{
    CandidateEvaluation, CombinationStrategy, Combiner, Consensus, PolicyPrimary, Proposal,
    RankedCandidate, Ranking, SchedulerPrimary, WeightedBlend,
};
pub use engine::{PlacementEngine, PlacementEngineBuilder};
pub use overrides::{OverrideManager, OverrideOutcome};
pub use sources::{
    CandidateSupplier, OverrideStore, PolicyStore, StaticCandidates, StaticOverrides,
    StaticPolicies,
};
pub use validator::{Validator, placements};
