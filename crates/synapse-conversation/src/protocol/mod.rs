//! Wire format types for provider-specific API protocols
//!
//! Each module contains pure serde structs matching the respective provider's
//! JSON message format. These types are only used at the codec boundary and
//! never leak into the canonical model.

pub mod anthropic;
pub mod google;
pub mod openai;
