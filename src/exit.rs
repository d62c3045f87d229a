//! Exit reasons shared by the build and push flows.
//!
//! Flows and platforms speak in [`ExitReason`]; only the CLI turns a reason
//! into a process exit status via [`ExitReason::code`].

use std::fmt;

/// Outcome of a build or push, mapped to an integer only at the process
/// boundary.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ExitReason {
    /// The job finished successfully.
    Success,
    /// The job could not be resolved.
    ResolveFailed,
    /// Source code could not be fetched.
    DownloadFailed,
    /// The source or build archive could not be unpacked.
    UnpackFailed,
    /// Encrypted properties or job configuration were unusable.
    ConfigFailed,
    /// No usable platform exists under the requested name.
    InvalidPlatform,
    /// A build command failed.
    BuildFailed,
    /// The build output could not be archived.
    PackFailed,
    /// The archive could not be moved into place.
    MoveFailed,
    /// A deployment command failed.
    DeployFailed,
    /// The Unix build host is not configured.
    UnixConfig,
    /// The workspace could not be exported to the Unix build host.
    UnixExport,
    /// A command failed on the Unix build host.
    UnixBuild,
    /// The workspace could not be imported from the Unix build host.
    UnixImport,
    /// The Windows AWS builder is not configured.
    WindowsConfig,
    /// The workspace could not be exported to the Windows instance.
    WindowsExport,
    /// A command failed on the Windows instance.
    WindowsBuild,
    /// The workspace could not be imported from the Windows instance.
    WindowsImport,
    /// The rsync deployment target is not configured.
    RsyncConfig,
    /// A pre-push command failed.
    RsyncPrePush,
    /// Transferring files to the deployment target failed.
    RsyncTransfer,
    /// A post-push command failed.
    RsyncPostPush,
}

impl ExitReason {
    /// Process exit status for this reason.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::ResolveFailed => 1,
            Self::DownloadFailed => 2,
            Self::UnpackFailed => 3,
            Self::ConfigFailed => 4,
            Self::InvalidPlatform => 5,
            Self::BuildFailed => 6,
            Self::PackFailed => 7,
            Self::MoveFailed => 8,
            Self::DeployFailed => 9,
            Self::UnixConfig => 100,
            Self::UnixExport => 101,
            Self::UnixBuild => 102,
            Self::UnixImport => 103,
            Self::WindowsConfig => 200,
            Self::WindowsExport => 201,
            Self::WindowsBuild => 202,
            Self::WindowsImport => 203,
            Self::RsyncConfig => 300,
            Self::RsyncPrePush => 301,
            Self::RsyncTransfer => 302,
            Self::RsyncPostPush => 303,
        }
    }

    /// Returns `true` for [`ExitReason::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Fixed operator-facing message.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Success => "Success!",
            Self::ResolveFailed => "Job could not be resolved",
            Self::DownloadFailed => "Source code could not be downloaded",
            Self::UnpackFailed => "Archive could not be unpacked",
            Self::ConfigFailed => "Job configuration is invalid",
            Self::InvalidPlatform => "Invalid platform specified",
            Self::BuildFailed => "Build command failed",
            Self::PackFailed => "Build output could not be archived",
            Self::MoveFailed => "Archive could not be moved into place",
            Self::DeployFailed => "Deployment failed",
            Self::UnixConfig => "Unix build host is not configured",
            Self::UnixExport => "Failed to export workspace to Unix build host",
            Self::UnixBuild => "Build failed on Unix build host",
            Self::UnixImport => "Failed to import workspace from Unix build host",
            Self::WindowsConfig => "Windows builder is not configured",
            Self::WindowsExport => "Failed to export workspace to Windows instance",
            Self::WindowsBuild => "Build failed on Windows instance",
            Self::WindowsImport => "Failed to import workspace from Windows instance",
            Self::RsyncConfig => "Rsync deployment target is not configured",
            Self::RsyncPrePush => "Pre-push command failed",
            Self::RsyncTransfer => "Failed to transfer files to deployment target",
            Self::RsyncPostPush => "Post-push command failed",
        }
    }

    /// Converts a step result into a reason, using `failure` when the step
    /// did not succeed.
    #[must_use]
    pub const fn from_step(succeeded: bool, failure: Self) -> Self {
        if succeeded { Self::Success } else { failure }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::ExitReason;

    #[rstest]
    #[case(ExitReason::Success, 0)]
    #[case(ExitReason::InvalidPlatform, 5)]
    #[case(ExitReason::MoveFailed, 8)]
    #[case(ExitReason::UnixConfig, 100)]
    #[case(ExitReason::WindowsConfig, 200)]
    #[case(ExitReason::WindowsImport, 203)]
    #[case(ExitReason::RsyncPostPush, 303)]
    fn codes_are_stable(#[case] reason: ExitReason, #[case] code: i32) {
        assert_eq!(reason.code(), code);
    }

    #[test]
    fn display_uses_fixed_message() {
        assert_eq!(
            ExitReason::InvalidPlatform.to_string(),
            "Invalid platform specified"
        );
    }

    #[test]
    fn from_step_maps_failure() {
        assert_eq!(
            ExitReason::from_step(false, ExitReason::UnixBuild),
            ExitReason::UnixBuild
        );
        assert!(ExitReason::from_step(true, ExitReason::UnixBuild).is_success());
    }
}
