//! Tests for the interpreter
//!
//! Organized by feature area

mod expression_tests;
mod helpers;
