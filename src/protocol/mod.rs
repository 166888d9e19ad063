//! ActivityStreams/ActivityPub wire types.

pub mod activities;
pub mod collections;
pub mod context;
pub mod helpers;
pub mod objects;
pub mod public_key;
pub mod verification;
