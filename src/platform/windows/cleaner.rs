//! Removal of S3 transfer objects and instance directories.

use crate::aws::AwsError;
use crate::events::EventContext;
use crate::exec::Env;
use crate::platform::Toolkit;
use crate::remote::{RemoteCommand, RemoteTarget, SsmInstance};

use super::powershell::remove_dir;
use super::scripts::InstanceLayout;

/// Deletes a job's transfer artifacts and its directories on the instance.
pub struct AwsResourceCleaner<'t, 'a> {
    toolkit: Toolkit<'t, 'a>,
}

impl<'t, 'a> AwsResourceCleaner<'t, 'a> {
    /// Creates a cleaner.
    #[must_use]
    pub const fn new(toolkit: Toolkit<'t, 'a>) -> Self {
        Self { toolkit }
    }

    /// Deletes every existing object in `artifact_keys` from `bucket`, then
    /// removes the job directory on `instance`.
    ///
    /// Objects that are already absent count as removed. Both phases always
    /// run; the result is `true` only when both succeeded.
    #[must_use]
    pub fn clean(
        &self,
        instance: &SsmInstance,
        bucket: &str,
        artifact_keys: &[String],
        layout: &InstanceLayout,
    ) -> bool {
        let s3_clean = match self.delete_artifacts(instance, bucket, artifact_keys) {
            Ok(()) => true,
            Err(err) => {
                self.toolkit.logger.failure(
                    "Failed to remove build artifacts from S3",
                    &EventContext::new()
                        .with("bucket", bucket)
                        .with("artifacts", artifact_keys.join(", "))
                        .with("error", err.to_string()),
                );
                false
            }
        };

        let instance_clean = self.toolkit.remote().run(
            &RemoteTarget::Ssm(instance.clone()),
            &RemoteCommand::line(remove_dir(layout.job_dir())),
            &Env::new(),
            self.toolkit.timeouts().internal,
            "Remove build files from instance",
        );

        s3_clean && instance_clean
    }

    fn delete_artifacts(
        &self,
        instance: &SsmInstance,
        bucket: &str,
        artifact_keys: &[String],
    ) -> Result<(), AwsError> {
        let aws = self.toolkit.aws(instance.context.clone());
        for key in artifact_keys {
            if aws.object_exists(bucket, key)? {
                aws.delete_object(bucket, key)?;
            }
        }
        Ok(())
    }
}
