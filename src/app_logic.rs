/*
 * This module provides the application logic layer. `ClassificationSession` is the
 * entry point for a browser or command-line front end: it submits classification
 * rules, hands out the resulting package previews, applies the user's
 * ignore/map decisions and serves paginated directory listings.
 * Unit tests for the session are in `session_tests.rs`.
 */
pub mod session;


pub use session::{ClassificationSession, EnumeratorId, SessionError};
