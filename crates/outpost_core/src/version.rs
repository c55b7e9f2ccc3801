//! Client/server protocol versions.
//!
//! The persisted protocol version records which on-disk migrations have run.
//! Every value here is also a migration target.

use std::fmt;

macro_rules! protocol_versions {
    ($($variant:ident = $value:literal => $name:literal,)+) => {
        /// Every protocol version the client has shipped, in order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(u32)]
        pub enum ProtocolVersion {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant = $value,
            )+
        }

        impl ProtocolVersion {
            /// All versions in increasing order.
            pub const ALL: &'static [ProtocolVersion] = &[$(ProtocolVersion::$variant,)+];

            /// Looks up a version by its persisted value.
            #[must_use]
            pub const fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Returns the registry name of this version.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }
    };
}

protocol_versions! {
    Initial = 0 => "INITIAL_VERSION",
    AddHeaders = 1 => "ADD_HEADERS_VERSION",
    Test = 2 => "TEST_VERSION",
    RenameEvent = 3 => "RENAME_EVENT_VERSION",
    AddToViewpoint = 4 => "ADD_TO_VIEWPOINT_VERSION",
    QueryEpisodes = 5 => "QUERY_EPISODES_VERSION",
    UpdatePost = 6 => "UPDATE_POST_VERSION",
    UpdateShare = 7 => "UPDATE_SHARE_VERSION",
    AddOpHeader = 8 => "ADD_OP_HEADER_VERSION",
    AddActivity = 9 => "ADD_ACTIVITY_VERSION",
    ExtractMd5Hashes = 10 => "EXTRACT_MD5_HASHES",
    InlineInvalidations = 11 => "INLINE_INVALIDATIONS",
    ExtractFileSizes = 12 => "EXTRACT_FILE_SIZES",
    InlineComments = 13 => "INLINE_COMMENTS",
    ExtractAssetKeys = 14 => "EXTRACT_ASSET_KEYS",
    SplitNames = 15 => "SPLIT_NAMES",
    ExplicitShareOrder = 16 => "EXPLICIT_SHARE_ORDER",
    SuppressBlankCoverPhoto = 17 => "SUPPRESS_BLANK_COVER_PHOTO",
    SupportMultipleIdentitiesPerContact = 18 => "SUPPORT_MULTIPLE_IDENTITIES_PER_CONTACT",
    RenamePhotoLabel = 19 => "RENAME_PHOTO_LABEL",
    SuppressAuthName = 20 => "SUPPRESS_AUTH_NAME",
    SendEmailToken = 21 => "SEND_EMAIL_TOKEN",
    SupportRemovedFollowers = 22 => "SUPPORT_REMOVED_FOLLOWERS",
    SuppressCopyTimestamp = 23 => "SUPPRESS_COPY_TIMESTAMP",
    SupportContactLimits = 24 => "SUPPORT_CONTACT_LIMITS",
    SuppressEmptyTitle = 25 => "SUPPRESS_EMPTY_TITLE",
}

impl ProtocolVersion {
    /// The version this build writes.
    pub const CURRENT: Self = Self::SuppressEmptyTitle;

    /// Returns the compiled-in current version.
    #[must_use]
    pub const fn current() -> Self {
        Self::CURRENT
    }

    /// Returns the persisted integer.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u32())
    }
}
