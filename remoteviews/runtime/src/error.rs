//! Error families for building, encoding and applying remote views.

use std::time::Duration;

use thiserror::Error;

use crate::value::ParamType;

/// Failure of a single action while it is applied to a view tree.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActionError {
    /// No setter is registered for the class, argument type and method.
    #[error("view {class} can't use method with RemoteViews: {method}({param})")]
    MethodNotFound {
        /// Class name of the target view.
        class: String,
        /// Requested setter name.
        method: String,
        /// Argument type of the setter.
        param: ParamType,
    },

    /// The setter exists but is not allowed to be invoked remotely.
    #[error("view {class}, method {method} is not remotable")]
    NotRemotable {
        /// Class name of the target view.
        class: String,
        /// Requested setter name.
        method: String,
    },

    /// The value handed to a setter does not match its argument type.
    #[error("method {method} expects {expected}, got {actual}")]
    ArgumentMismatch {
        /// Setter name.
        method: String,
        /// Declared argument type.
        expected: ParamType,
        /// Argument type of the supplied value.
        actual: ParamType,
    },

    /// The target view does not have the capability the action needs.
    #[error("view {view_id} ({class}) is not a {expected}")]
    WrongTargetType {
        /// Id of the target view.
        view_id: i32,
        /// Class name of the target view.
        class: String,
        /// Capability the action required.
        expected: &'static str,
    },

    /// A resource id has no value in the consumer's resource table.
    #[error("resource 0x{0:08x} not found")]
    ResourceNotFound(i32),

    /// A resource resolved to a value of the wrong type.
    #[error("resource 0x{id:08x} is not a {expected}")]
    WrongResourceType {
        /// Resource id.
        id: i32,
        /// Expected value kind.
        expected: &'static str,
    },

    /// A theme attribute is not defined in the current theme.
    #[error("attribute 0x{0:08x} is not defined in the theme")]
    AttributeNotFound(i32),

    /// Light and dark payloads of a night-mode setter disagree with its type.
    #[error("night mode payload for {method} does not match {param}")]
    MalformedNightMode {
        /// Setter name.
        method: String,
        /// Declared argument type.
        param: ParamType,
    },

    /// A fill-in response fired on a view with no template ancestor.
    #[error("view {0} has a fill-in response but no ancestor carries a pending intent template")]
    MissingTemplate(i32),

    /// The inflater refused a class outside its allow-list.
    #[error("class {0} is not allowed to be inflated")]
    ClassNotAllowed(String),

    /// The inflater has no layout registered under the id.
    #[error("layout 0x{0:08x} is not known to the inflater")]
    UnknownLayout(i32),

    /// The inflater can't render draw-instruction payloads.
    #[error("draw instructions are not supported by this inflater")]
    DrawInstructionsUnsupported,

    /// A node handle no longer refers to a live view.
    #[error("view node {0} does not exist")]
    MissingNode(usize),

    /// A child index is past the end of the container.
    #[error("index {index} out of bounds for {count} children")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Current number of children.
        count: usize,
    },

    /// A background preparation step of a setter failed.
    #[error("failed to load {what}: {reason}")]
    Load {
        /// What was being loaded.
        what: String,
        /// Why it failed.
        reason: String,
    },
}

/// Failure detected while constructing or decoding a description tree.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// Subtree nesting exceeds the allowed depth.
    #[error("too many nested views: depth {depth} exceeds {max}")]
    TooManyNestedViews {
        /// Depth that was reached.
        depth: usize,
        /// Maximum allowed depth.
        max: usize,
    },

    /// A size map was empty.
    #[error("the set of sized remote views cannot be empty")]
    EmptySizeMap,

    /// A size map had more entries than allowed.
    #[error("too many sized remote views: {count} > {max}")]
    TooManySizes {
        /// Number of entries supplied.
        count: usize,
        /// Maximum number allowed.
        max: usize,
    },

    /// Variants were built for different applications.
    #[error("all variants must come from the same application ({expected} != {found})")]
    MixedApplications {
        /// Package of the first variant.
        expected: String,
        /// Package of the mismatching variant.
        found: String,
    },

    /// An action was added to a tree that holds size or orientation variants.
    #[error(
        "remote views specifying separate layouts for orientation or size cannot be modified; \
         fully configure each layout before combining them"
    )]
    VariantModeImmutable,

    /// Both an orientation pair and a size list were present.
    #[error("orientation and size variants are mutually exclusive")]
    ConflictingVariants,

    /// A required field was missing from a serialized tree.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A resource name has no id in the consumer's resource table.
    #[error("unresolvable resource name: {0}")]
    UnresolvableName(String),

    /// A resource id in the body has no entry in the name table.
    #[error("resource id 0x{0:08x} has no entry in the name table")]
    UnnamedResource(i32),

    /// An action referenced a bitmap missing from the cache.
    #[error("bitmap id {0} is not in the bitmap cache")]
    UnknownBitmap(usize),

    /// An action referenced a collection missing from the cache.
    #[error("collection id {0} is not in the collection cache")]
    UnknownCollection(i32),

    /// A serialized action carried a tag outside the known set.
    #[error("unknown action tag {0}")]
    UnknownActionTag(u8),

    /// Collection items failed builder validation.
    #[error("invalid collection items: {0}")]
    InvalidCollection(String),
}

/// Failure while encoding or decoding one of the wire forms.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Structured form failed to (de)serialize.
    #[error("structured form: {0}")]
    Json(#[from] serde_json::Error),

    /// Flat form failed to (de)serialize.
    #[error("flat form: {0}")]
    Flat(#[from] postcard::Error),

    /// Bitmap payload compression failed.
    #[error("bitmap compression: {0}")]
    Compression(#[from] std::io::Error),

    /// The decoded tree failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Failure while applying or reapplying a tree to views.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// An action failed.
    #[error(transparent)]
    Action(#[from] ActionError),

    /// The tree failed validation while selecting a variant.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The view was produced from a different layout.
    #[error(
        "attempting to re-apply remote views to a view that does not share the same root layout id \
         (view has {recorded:?}, tree wants 0x{expected:08x})"
    )]
    ReapplyMismatch {
        /// Layout id recorded on the view.
        recorded: Option<i32>,
        /// Layout id of the tree being applied.
        expected: i32,
    },

    /// The tree is flagged as not re-appliable.
    #[error("re-applying these remote views is disallowed")]
    ReapplyDisallowed,

    /// The async task was cancelled before phase two.
    #[error("apply was cancelled")]
    Cancelled,

    /// The background preparation task panicked or was aborted.
    #[error("background apply task failed: {0}")]
    Background(String),
}

/// Failure of one remote collection source. The collector recovers from
/// every variant by substituting an empty collection.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// The factory service could not be bound.
    #[error("failed to connect to collection factory {target}: {reason}")]
    Connect {
        /// Intent URI of the source.
        target: String,
        /// Why binding failed.
        reason: String,
    },

    /// The factory answered with an error.
    #[error("collection factory failed: {0}")]
    Factory(String),

    /// The factory did not answer in time.
    #[error("collection factory did not answer within {0:?}")]
    Timeout(Duration),

    /// The source belongs to another application.
    #[error("collection source {component} does not belong to {package}")]
    ForeignPackage {
        /// Component the source intent targets, or `<none>`.
        component: String,
        /// Package of the resolving context.
        package: String,
    },
}

/// Failure while serving one producer envelope.
#[derive(Debug, Error)]
pub enum HostError {
    /// The payload was not valid base64.
    #[error("payload is not base64: {0}")]
    Payload(#[from] base64::DecodeError),

    /// The payload did not decode to a valid tree.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A frame exceeded the cap for its direction and was skipped.
    #[error("frame too large: {len} > {max}")]
    FrameTooLarge {
        /// Length announced by the frame.
        len: usize,
        /// Cap for the direction the frame travelled.
        max: usize,
    },

    /// A frame did not hold a valid envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    /// The revision does not follow the last applied one.
    #[error("revision {got} does not follow {last:?}")]
    RevMismatch {
        /// Last applied revision, if any.
        last: Option<u64>,
        /// Revision the producer sent.
        got: u64,
    },

    /// A reapply arrived before any tree was applied.
    #[error("reapply without an applied tree")]
    ResyncRequired,

    /// Applying or reapplying the tree failed.
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// An interaction targeted a view that is not on screen.
    #[error("no view with id {0} is on screen")]
    UnknownView(i32),

    /// Firing an interaction failed.
    #[error(transparent)]
    Action(#[from] ActionError),
}

impl HostError {
    /// Wire code reported for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Payload(_) | Self::Codec(_) => "decode_error",
            Self::FrameTooLarge { .. } => "frame_too_large",
            Self::InvalidEnvelope(_) => "invalid_envelope",
            Self::RevMismatch { .. } => "rev_mismatch",
            Self::ResyncRequired => "resync_required",
            Self::Apply(_) => "patch_apply_error",
            Self::UnknownView(_) => "unknown_view",
            Self::Action(_) => "interaction_error",
        }
    }
}

/// Crate-wide error.
#[derive(Debug, Error)]
pub enum Error {
    /// See [`ActionError`].
    #[error(transparent)]
    Action(#[from] ActionError),
    /// See [`ValidationError`].
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// See [`CodecError`].
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// See [`ApplyError`].
    #[error(transparent)]
    Apply(#[from] ApplyError),
    /// See [`RemoteError`].
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// See [`HostError`].
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
