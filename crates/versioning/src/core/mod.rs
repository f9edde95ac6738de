//! Core traits.
//!
//! - [`Transaction`] / [`TransactionProvider`] - the row-level unit of work
//!   implemented by backends
//! - [`WriteInterceptor`] - hooks around writes
//! - [`ContentValidator`] - content validation before storage
//! - [`ConditionalMatcher`] - resolution of conditional create criteria

mod interceptor;
mod matcher;
mod transaction;
mod validator;

pub use interceptor::WriteInterceptor;
pub use matcher::ConditionalMatcher;
pub use transaction::{Transaction, TransactionProvider};
pub use validator::{ContentValidator, ReferenceTargetValidator};
