use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All errors possible to occur during reconciliation.
///
/// Per-item failures (a bad selector, a bad mapping) are logged and skipped
/// by their call sites; everything else aborts the reconcile and is surfaced
/// through the error policy and the Bundle's Ready condition.
#[derive(Error, Debug)]
pub enum Error {
    /// A target or partition criterion that cannot be compiled.
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    /// A namespace mapping resource that cannot be compiled.
    #[error("invalid bundle namespace mapping: {0}")]
    InvalidNamespaceMapping(String),

    /// Value tree nesting beyond the supported depth.
    #[error("values exceed the maximum nesting depth of {0}")]
    TemplateRecursion(usize),

    #[error("template error: {0}")]
    TemplateError(#[source] minijinja::Error),

    /// `valuesFrom` named a key absent from the referenced object.
    #[error("key {key:?} not found in {name:?}")]
    MissingValuesKey { name: String, key: String },

    /// Stored payload no longer matches its recorded digest. Never healed
    /// automatically.
    #[error("content digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("kubernetes reported error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("yaml error: {0}")]
    YamlError(#[source] serde_yaml::Error),

    #[error("io error: {0}")]
    IoError(#[source] std::io::Error),

    #[error("finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    /// Error in user input or resource definition, typically missing fields.
    #[error("invalid resource: {0}")]
    UserInputError(String),
}

impl Error {
    /// Stable label for the failure counter.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::InvalidSelector(_) => "invalid_selector",
            Error::InvalidNamespaceMapping(_) => "invalid_namespace_mapping",
            Error::TemplateRecursion(_) => "template_recursion",
            Error::TemplateError(_) => "template_error",
            Error::MissingValuesKey { .. } => "missing_values_key",
            Error::DigestMismatch { .. } => "digest_mismatch",
            Error::KubeError(_) => "kube_error",
            Error::SerializationError(_) => "serialization_error",
            Error::YamlError(_) => "yaml_error",
            Error::IoError(_) => "io_error",
            Error::FinalizerError(_) => "finalizer_error",
            Error::UserInputError(_) => "user_input_error",
        }
    }

    /// Optimistic-concurrency loss; retried by re-enqueue.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 409)
    }

    /// Object deleted between list and act; a no-op for the current pass.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 404)
    }
}
