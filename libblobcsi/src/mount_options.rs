//! Mount option assembly for the blobfuse helper.

/// Seconds after which blobfuse cancels the initial container listing.
/// Prevents listing charges on large containers at mount time.
pub const CANCEL_LIST_ON_MOUNT_SECONDS: &str = "60";

/// Option the driver adds when the account has hierarchical namespace on.
pub const USE_ADLS_OPTION: &str = "--use-adls=true";

/// Options the driver always wants on a blobfuse mount, unless the caller
/// overrides them. Order is the order they are appended in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDefaults {
    defaults: Vec<(&'static str, String)>,
}

impl EngineDefaults {
    pub fn new(tmp_path: &str, container_name: &str) -> Self {
        Self {
            defaults: vec![
                ("--pre-mount-validate", "true".to_owned()),
                ("--use-https", "true".to_owned()),
                ("--tmp-path", tmp_path.to_owned()),
                ("--container-name", container_name.to_owned()),
                (
                    "--cancel-list-on-mount-seconds",
                    CANCEL_LIST_ON_MOUNT_SECONDS.to_owned(),
                ),
            ],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.defaults.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

/// Merge caller flags with the engine defaults.
///
/// Caller flags keep their order. A default is appended only when no caller
/// flag starts with its key; an empty default value is emitted as a bare
/// flag.
pub fn build(caller_flags: &[String], defaults: &EngineDefaults) -> Vec<String> {
    let mut options = caller_flags.to_vec();
    for (key, value) in defaults.iter() {
        if caller_flags.iter().any(|flag| flag.starts_with(key)) {
            continue;
        }
        if value.is_empty() {
            options.push(key.to_owned());
        } else {
            options.push(format!("{key}={value}"));
        }
    }
    options
}

/// Append `extra` to `options`, skipping entries already present.
pub fn join_mount_options(options: &[String], extra: &[String]) -> Vec<String> {
    let mut joined: Vec<String> = Vec::with_capacity(options.len() + extra.len());
    for opt in options.iter().chain(extra) {
        if !joined.contains(opt) {
            joined.push(opt.clone());
        }
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn defaults_are_appended_in_order() {
        let opts = build(&[], &EngineDefaults::new("/mnt/vol#1", "cont"));
        assert_eq!(
            opts,
            strings(&[
                "--pre-mount-validate=true",
                "--use-https=true",
                "--tmp-path=/mnt/vol#1",
                "--container-name=cont",
                "--cancel-list-on-mount-seconds=60",
            ])
        );
    }

    #[test]
    fn caller_flag_suppresses_default() {
        let caller = strings(&["-o allow_other", "--tmp-path=/custom"]);
        let opts = build(&caller, &EngineDefaults::new("/mnt/vol#1", "cont"));
        assert_eq!(&opts[..2], caller.as_slice());
        assert!(opts.contains(&"--tmp-path=/custom".to_owned()));
        assert!(!opts.iter().any(|o| o == "--tmp-path=/mnt/vol#1"));
        assert_eq!(
            opts.iter().filter(|o| o.starts_with("--tmp-path")).count(),
            1
        );
    }

    #[test]
    fn build_is_deterministic() {
        let caller = strings(&["--use-https=false", "--file-cache-timeout-in-seconds=120"]);
        let defaults = EngineDefaults::new("/mnt/x", "c");
        assert_eq!(build(&caller, &defaults), build(&caller, &defaults));
    }

    #[test]
    fn join_skips_duplicates() {
        let joined = join_mount_options(
            &strings(&["ro", "--use-adls=true"]),
            &strings(&["--use-adls=true", "sec=sys,vers=3,nolock"]),
        );
        assert_eq!(
            joined,
            strings(&["ro", "--use-adls=true", "sec=sys,vers=3,nolock"])
        );
    }
}
