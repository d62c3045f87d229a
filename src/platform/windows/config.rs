//! Windows builder settings taken from a job's platform configuration.

use crate::aws::AwsContext;
use crate::events::EventContext;
use crate::job::JobProperties;
use crate::platform::Toolkit;
use crate::remote::SsmInstance;

/// Instance directory used when the job does not name one.
pub const DEFAULT_BASE_PATH: &str = r"C:\hal-agent";

/// Everything needed to reach the Windows build instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WindowsAwsConfig {
    /// Instance running the build.
    pub instance: SsmInstance,
    /// Bucket used to move workspaces to and from the instance.
    pub bucket: String,
    /// Root of per-job directories on the instance.
    pub base_path: String,
}

/// Resolves [`WindowsAwsConfig`] for a job.
///
/// Recognised settings: `region`, `bucket`, `instance_id` or
/// `instance_filter`, and optionally `profile` and `base_path`.
pub struct WindowsConfigurator<'t, 'a> {
    toolkit: Toolkit<'t, 'a>,
}

impl<'t, 'a> WindowsConfigurator<'t, 'a> {
    /// Creates a configurator.
    #[must_use]
    pub const fn new(toolkit: Toolkit<'t, 'a>) -> Self {
        Self { toolkit }
    }

    /// Returns the configuration for `job`, or `None` after logging why it
    /// is incomplete.
    #[must_use]
    pub fn configure(&self, job: &JobProperties) -> Option<WindowsAwsConfig> {
        let missing: Vec<&str> = ["region", "bucket"]
            .into_iter()
            .filter(|key| job.setting(key).is_none())
            .chain(
                (job.setting("instance_id").is_none() && job.setting("instance_filter").is_none())
                    .then_some("instance_filter"),
            )
            .collect();
        if !missing.is_empty() {
            self.not_configured(&EventContext::new().with("missing", missing.join(", ")));
            return None;
        }
        let region = job.setting("region")?;
        let bucket = job.setting("bucket")?;

        let context = AwsContext {
            region: region.to_owned(),
            profile: job.setting("profile").map(str::to_owned),
        };
        let instance_id = match job.setting("instance_id") {
            Some(id) => id.to_owned(),
            None => self.find_instance(&context, job.setting("instance_filter")?)?,
        };

        Some(WindowsAwsConfig {
            instance: SsmInstance {
                instance_id,
                context,
            },
            bucket: bucket.to_owned(),
            base_path: job
                .setting("base_path")
                .unwrap_or(DEFAULT_BASE_PATH)
                .to_owned(),
        })
    }

    fn find_instance(&self, context: &AwsContext, filter: &str) -> Option<String> {
        match self.toolkit.aws(context.clone()).find_instance(filter) {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                self.not_configured(
                    &EventContext::new()
                        .with("instance_filter", filter)
                        .with("reason", "no running instance matches"),
                );
                None
            }
            Err(err) => {
                self.not_configured(
                    &EventContext::new()
                        .with("instance_filter", filter)
                        .with("error", err.to_string()),
                );
                None
            }
        }
    }

    fn not_configured(&self, context: &EventContext) {
        self.toolkit
            .logger
            .failure("Windows build instance is not configured", context);
    }
}
