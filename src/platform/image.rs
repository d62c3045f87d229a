//! Build image selection and Docker reference validation.

/// Prefix marking an image as a Docker reference.
pub const DOCKER_PREFIX: &str = "docker:";

/// How a job's commands are executed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildImage<'i> {
    /// Inside a container built or pulled from the reference.
    Docker(&'i str),
    /// Directly on the build host.
    Native,
}

impl<'i> BuildImage<'i> {
    /// Classifies a job's image setting.
    #[must_use]
    pub fn parse(image: Option<&'i str>) -> Self {
        image
            .and_then(|value| value.trim().strip_prefix(DOCKER_PREFIX))
            .map_or(Self::Native, |reference| Self::Docker(reference.trim()))
    }
}

/// Splits a leading `docker:<ref>` override token off a step command.
///
/// # Examples
///
/// ```
/// # use hal_agent::platform::image::split_step_image;
/// assert_eq!(
///     split_step_image("docker:node:18 npm test"),
///     (Some("node:18"), "npm test")
/// );
/// assert_eq!(split_step_image("npm test"), (None, "npm test"));
/// ```
#[must_use]
pub fn split_step_image(command: &str) -> (Option<&str>, &str) {
    let trimmed = command.trim_start();
    let Some(rest) = trimmed.strip_prefix(DOCKER_PREFIX) else {
        return (None, command);
    };
    match rest.split_once(char::is_whitespace) {
        Some((reference, remainder)) => (Some(reference), remainder.trim_start()),
        None => (Some(rest), ""),
    }
}

/// Validates `[registry[:port]/]path[:tag][@digest]`.
///
/// Path components are lowercase alphanumerics joined by single `.`, `_`
/// or `-` separators (or a double `_`). Whitespace is never allowed.
#[must_use]
pub fn is_valid_image_reference(reference: &str) -> bool {
    if reference.is_empty() || reference.chars().any(char::is_whitespace) {
        return false;
    }

    let (name_and_tag, digest) = match reference.split_once('@') {
        Some((name, digest)) => (name, Some(digest)),
        None => (reference, None),
    };
    if digest.is_some_and(|value| !is_valid_digest(value)) {
        return false;
    }

    let last_slash = name_and_tag.rfind('/').map_or(0, |index| index + 1);
    let (name, tag) = match name_and_tag
        .char_indices()
        .rev()
        .find(|(index, ch)| *ch == ':' && *index >= last_slash)
    {
        Some((index, _)) => (
            name_and_tag.get(..index).unwrap_or_default(),
            name_and_tag.get(index + 1..),
        ),
        None => (name_and_tag, None),
    };
    if tag.is_some_and(|value| !is_valid_tag(value)) {
        return false;
    }

    let mut components: Vec<&str> = name.split('/').collect();
    if components.len() > 1
        && let Some(first) = components.first()
        && (first.contains('.') || first.contains(':') || *first == "localhost")
    {
        if !is_valid_registry(first) {
            return false;
        }
        components.remove(0);
    }
    !components.is_empty() && components.into_iter().all(is_valid_component)
}

/// Returns `true` for a single lowercase path component.
#[must_use]
pub fn is_valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    if bytes.is_empty()
        || !bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        || !bytes.last().is_some_and(u8::is_ascii_alphanumeric)
    {
        return false;
    }
    let mut separator_run = String::new();
    for ch in component.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            let separator_ok = matches!(separator_run.as_str(), "." | "_" | "__")
                || separator_run.chars().all(|sep| sep == '-');
            if !separator_ok {
                return false;
            }
            separator_run.clear();
        } else if matches!(ch, '.' | '_' | '-') {
            separator_run.push(ch);
        } else {
            return false;
        }
    }
    true
}

fn is_valid_registry(registry: &str) -> bool {
    let (host, port) = match registry.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (registry, None),
    };
    let host_ok = !host.is_empty()
        && host
            .split('.')
            .all(|label| !label.is_empty() && label.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-'));
    let port_ok = port.is_none_or(|value| !value.is_empty() && value.chars().all(|ch| ch.is_ascii_digit()));
    host_ok && port_ok
}

fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= 128
        && !tag.starts_with(['.', '-'])
        && tag
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
}

fn is_valid_digest(digest: &str) -> bool {
    digest.split_once(':').is_some_and(|(algorithm, hex)| {
        !algorithm.is_empty()
            && algorithm
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
            && hex.len() >= 32
            && hex.chars().all(|ch| ch.is_ascii_hexdigit())
    })
}
