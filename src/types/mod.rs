//! Core types for the provenance record engine.

pub mod certificate;
pub mod signature;
pub mod step;

pub use certificate::{Certificate, CertificateError, CertificateMaterial, CertificateParams};
pub use signature::{SignatureRecord, SignatureReport};
pub use step::{Step, StepError, StepId, StepKind};
