//! Instance discovery.

use crate::exec::CommandRunner;

use super::{AwsCli, AwsError};

impl<R: CommandRunner> AwsCli<R> {
    /// Returns the ID of the first running instance whose `Name` tag
    /// matches `name_filter`, which may contain `*` wildcards.
    ///
    /// # Errors
    ///
    /// Returns [`AwsError`] when the call fails or the response is not a
    /// list of IDs.
    pub fn find_instance(&self, name_filter: &str) -> Result<Option<String>, AwsError> {
        let args = vec![
            String::from("ec2"),
            String::from("describe-instances"),
            String::from("--filters"),
            format!("Name=tag:Name,Values={name_filter}"),
            String::from("Name=instance-state-name,Values=running"),
            String::from("--query"),
            String::from("Reservations[].Instances[].InstanceId"),
        ];
        let response = self.call_json(&args)?;
        let ids: Vec<String> =
            serde_json::from_value(response).map_err(|err| AwsError::Parse {
                operation: String::from("ec2 describe-instances"),
                message: err.to_string(),
            })?;
        Ok(ids.into_iter().next())
    }
}
