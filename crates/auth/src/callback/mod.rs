// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local HTTP listener that receives the provider's redirect.

pub mod bind;
pub mod listener;
pub mod page;

pub use listener::{
    CallbackFailure, CallbackListener, CallbackOutcome, CallbackParams, ListenerState, WaitOutcome,
};
pub use page::Page;
