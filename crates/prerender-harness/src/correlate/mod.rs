//! Trial correlation engine
//!
//! Attaches to one or more independent browser debugging sessions (the
//! visible page and any speculative sub-targets it spawns), consumes their
//! asynchronous lifecycle and network events, resolves which logical
//! destination each event belongs to, and reduces the event stream into a
//! single structured trial outcome.
//!
//! All handlers execute to completion without preemption; cross-session
//! ordering is never assumed. The shared [`trial::TrialCell`] is the single
//! liveness gate: once a trial is torn down, every late event becomes a
//! no-op.

pub mod outcome;
pub mod router;
pub mod subtarget;
pub mod trial;

pub use outcome::{reduce, TrialVerdict, VerdictStatus};
pub use router::{NetworkEvent, SessionBinding, SessionEventRouter};
pub use subtarget::{
    PreloadPhase, PreloadUpdate, SubTargetLifecycleManager, SubTargetState, TargetAttached,
};
pub use trial::{
    ActivationRecord, ActivationStatus, CandidateOutcome, CandidateRecord, TrialCell, TrialState,
};
