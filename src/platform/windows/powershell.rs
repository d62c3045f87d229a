//! PowerShell snippets sent to the instance through SSM.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::remote::powershell_quote;

use super::scripts::InstanceLayout;

const EXIT_ON_FAILURE: &str = "if ($LASTEXITCODE) { exit $LASTEXITCODE }";

/// `line` followed by a native exit-code check.
#[must_use]
pub fn checked(line: impl Into<String>) -> Vec<String> {
    vec![line.into(), EXIT_ON_FAILURE.to_owned()]
}

/// Stops the script on the first cmdlet error.
#[must_use]
pub fn strict_mode() -> String {
    String::from("$ErrorActionPreference = 'Stop'")
}

/// Creates `path` and any missing parents.
#[must_use]
pub fn ensure_dir(path: &str) -> String {
    format!(
        "New-Item -ItemType Directory -Force -Path {} | Out-Null",
        powershell_quote(path)
    )
}

/// Removes `path` recursively if it exists.
#[must_use]
pub fn remove_dir(path: &str) -> String {
    let quoted = powershell_quote(path);
    format!(
        "if (Test-Path -LiteralPath {quoted}) {{ Remove-Item -LiteralPath {quoted} -Recurse -Force }}"
    )
}

/// Empties `path`, leaving an existing directory.
#[must_use]
pub fn reset_dir(path: &str) -> Vec<String> {
    vec![remove_dir(path), ensure_dir(path)]
}

/// Writes `contents` to `path` as UTF-8, transported as base64.
#[must_use]
pub fn write_file(path: &str, contents: &str) -> String {
    format!(
        "[IO.File]::WriteAllText({}, [Text.Encoding]::UTF8.GetString([Convert]::FromBase64String('{}')))",
        powershell_quote(path),
        STANDARD.encode(contents.as_bytes())
    )
}

/// Checks instance prerequisites and writes every generated file.
#[must_use]
pub fn prepare_instance(
    layout: &InstanceLayout,
    files: &[(&str, &str)],
    require_docker: bool,
) -> Vec<String> {
    let input = layout.input_dir();
    let mut lines = vec![
        strict_mode(),
        format!(
            "if (-not (Test-Path -LiteralPath {})) {{ throw 'Input directory {} is missing' }}",
            powershell_quote(&input),
            input.replace('\'', "''")
        ),
    ];
    if require_docker {
        lines.push(String::from(
            "if (-not (Get-Command docker -ErrorAction SilentlyContinue)) { throw 'docker is not installed' }",
        ));
    }
    lines.extend(reset_dir(&layout.scripts_dir()));
    lines.extend(reset_dir(&layout.output_dir()));
    lines.extend(files.iter().map(|(path, contents)| write_file(path, contents)));
    lines
}

/// Moves the output workspace into the input directory for the next
/// container.
#[must_use]
pub fn shift_workspace(layout: &InstanceLayout) -> Vec<String> {
    let input = layout.input_dir();
    let output = layout.output_dir();
    let mut lines = vec![strict_mode()];
    lines.extend(reset_dir(&input));
    lines.push(format!(
        "Copy-Item -Path {} -Destination {} -Recurse -Force",
        powershell_quote(&format!("{output}\\*")),
        powershell_quote(&input)
    ));
    lines.extend(reset_dir(&output));
    lines
}

/// Copies the input workspace to the output directory unchanged.
#[must_use]
pub fn copy_input_to_output(layout: &InstanceLayout) -> Vec<String> {
    let output = layout.output_dir();
    let mut lines = vec![strict_mode()];
    lines.extend(reset_dir(&output));
    lines.push(format!(
        "Copy-Item -Path {} -Destination {} -Recurse -Force",
        powershell_quote(&format!("{}\\*", layout.input_dir())),
        powershell_quote(&output)
    ));
    lines
}

/// Downloads `key` from `bucket` and unpacks it into the input directory.
#[must_use]
pub fn fetch_input(layout: &InstanceLayout, bucket: &str, key: &str, region: &str) -> Vec<String> {
    let archive = format!("{}\\input.tar.gz", layout.job_dir());
    let input = layout.input_dir();
    let mut lines = vec![strict_mode()];
    lines.extend(reset_dir(&input));
    lines.push(format!(
        "Read-S3Object -BucketName {} -Key {} -File {} -Region {} | Out-Null",
        powershell_quote(bucket),
        powershell_quote(key),
        powershell_quote(&archive),
        powershell_quote(region)
    ));
    lines.extend(checked(format!(
        "tar -xzf {} -C {}",
        powershell_quote(&archive),
        powershell_quote(&input)
    )));
    lines.push(format!("Remove-Item -LiteralPath {} -Force", powershell_quote(&archive)));
    lines
}

/// Packs the output directory and uploads it to `bucket` as `key`.
#[must_use]
pub fn publish_output(layout: &InstanceLayout, bucket: &str, key: &str, region: &str) -> Vec<String> {
    let archive = format!("{}\\output.tar.gz", layout.job_dir());
    let mut lines = vec![strict_mode()];
    lines.extend(checked(format!(
        "tar -czf {} -C {} .",
        powershell_quote(&archive),
        powershell_quote(&layout.output_dir())
    )));
    lines.push(format!(
        "Write-S3Object -BucketName {} -Key {} -File {} -Region {}",
        powershell_quote(bucket),
        powershell_quote(key),
        powershell_quote(&archive),
        powershell_quote(region)
    ));
    lines.push(format!("Remove-Item -LiteralPath {} -Force", powershell_quote(&archive)));
    lines
}
