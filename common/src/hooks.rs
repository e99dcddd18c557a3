//! Hook categories and per-category command lists

use enum_map::{Enum, EnumMap};

/// Which end of a transfer a hook (or a path) belongs to
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Side {
    Source,
    Destination,
}

/// The eight lifecycle points at which user commands can run
///
/// Declaration order is the order in which the transfer pipeline visits them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum HookKind {
    PreBackup,
    PostBackup,
    PreDownload,
    PostDownload,
    PreUpload,
    PostUpload,
    PreRestore,
    PostRestore,
}

impl HookKind {
    /// Side whose session executes hooks of this kind
    ///
    /// Backup and download hooks run on the source, upload and restore hooks on the destination.
    pub fn side(self) -> Side {
        match self {
            HookKind::PreBackup
            | HookKind::PostBackup
            | HookKind::PreDownload
            | HookKind::PostDownload => Side::Source,
            HookKind::PreUpload
            | HookKind::PostUpload
            | HookKind::PreRestore
            | HookKind::PostRestore => Side::Destination,
        }
    }
}

/// Ordered command lists keyed by hook category
pub type HookSet = EnumMap<HookKind, Vec<String>>;
