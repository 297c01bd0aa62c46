//! Router Module Index
//!
//! Routes are grouped by endpoint class. Access control is not a router layer:
//! each handler names its gate (`Approved`, `Enrolled`, `Admin`) as an
//! extractor, so a route cannot be mounted without one by accident.

/// Routes accessible without a credential.
pub mod public;

/// Routes for approved accounts, some additionally enrollment-gated.
pub mod authenticated;

/// Routes restricted to users whose live role is `admin`.
pub mod admin;
