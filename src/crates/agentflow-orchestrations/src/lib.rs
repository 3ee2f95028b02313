//! # agentflow-orchestrations - Higher-order workflow patterns
//!
//! Ready-made builders over [`agentflow_core`]'s primitives:
//!
//! - [`SequentialBuilder`] - participants in order, each feeding the
//!   next its accumulated conversation.
//! - [`ConcurrentBuilder`] - fan one input out to N participants and
//!   fan their responses back in, optionally through a reducer.
//! - [`GroupChatBuilder`] - round-robin or selector-driven speaker
//!   rotation with termination conditions.
//! - [`HandoffBuilder`] - a coordinator and specialists exchanging
//!   control through tool-like handoff calls, with an autonomous mode.
//! - [`MagenticBuilder`] - a manager that plans, selects, evaluates a
//!   progress ledger, and can pause for a human plan review.
//!
//! Every builder exposes `.with_request_info(...)` variants to route
//! selected participants' outputs through a human pause point before
//! they continue (see [`request_info::RequestInfoInterceptor`]).

pub mod adapters;
pub mod concurrent;
pub mod group_chat;
pub mod handoff;
pub mod magentic;
pub mod request_info;
pub mod sequential;

pub use concurrent::{ConcurrentBuilder, ConcurrentReducer};
pub use group_chat::{GroupChatBuilder, GroupChatState, SpeakerSelection, TextPredicate};
pub use handoff::{handoff_target, HandoffBuilder, DEFAULT_TURN_CAP};
pub use magentic::{
    MagenticBuilder, MagenticLedger, MagenticManager, MagenticPlanReviewRequest,
    MagenticPlanReviewResponse, MagenticProgress,
};
pub use request_info::{resolve_request_info_filter, RequestInfoInterceptor};
pub use sequential::SequentialBuilder;
