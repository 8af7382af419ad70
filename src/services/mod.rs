pub mod frozen_target;
pub mod refunds;
pub mod security;
pub mod sync;
