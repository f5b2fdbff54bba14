//! API route definitions
//!
//! The dashboard is a JSON REST surface: listing, submission, completion
//! actions, and finalize-job status. The browser front end is a separate
//! consumer of these routes.

pub mod downloads;
pub mod health;
