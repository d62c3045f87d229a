//! S3 transfer objects.

use camino::Utf8Path;

use crate::exec::CommandRunner;

use super::{AwsCli, AwsError};

/// Renders `s3://bucket/key`.
#[must_use]
pub fn s3_uri(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

impl<R: CommandRunner> AwsCli<R> {
    /// Returns whether `key` exists in `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`AwsError`] for failures other than a missing object.
    pub fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, AwsError> {
        let args = vec![
            String::from("s3api"),
            String::from("head-object"),
            String::from("--bucket"),
            bucket.to_owned(),
            String::from("--key"),
            key.to_owned(),
        ];
        let output = self.call_raw(&args)?;
        if output.is_success() {
            return Ok(true);
        }
        if output.stderr.contains("404") || output.stderr.contains("Not Found") {
            return Ok(false);
        }
        Err(self.failure(&args, output))
    }

    /// Deletes `key` from `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`AwsError`] when the call fails.
    pub fn delete_object(&self, bucket: &str, key: &str) -> Result<(), AwsError> {
        let args = vec![
            String::from("s3api"),
            String::from("delete-object"),
            String::from("--bucket"),
            bucket.to_owned(),
            String::from("--key"),
            key.to_owned(),
        ];
        self.call(&args).map(drop)
    }

    /// Uploads a local file to `bucket/key`.
    ///
    /// # Errors
    ///
    /// Returns [`AwsError`] when the copy fails.
    pub fn upload(&self, local: &Utf8Path, bucket: &str, key: &str) -> Result<(), AwsError> {
        let args = vec![
            String::from("s3"),
            String::from("cp"),
            local.to_string(),
            s3_uri(bucket, key),
        ];
        self.call(&args).map(drop)
    }

    /// Downloads `bucket/key` to a local file.
    ///
    /// # Errors
    ///
    /// Returns [`AwsError`] when the copy fails.
    pub fn download(&self, bucket: &str, key: &str, local: &Utf8Path) -> Result<(), AwsError> {
        let args = vec![
            String::from("s3"),
            String::from("cp"),
            s3_uri(bucket, key),
            local.to_string(),
        ];
        self.call(&args).map(drop)
    }
}
