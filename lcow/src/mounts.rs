//! Bind mount translation for utility VM containers.
//!
//! The host compute service only takes `bind` mounts, as mapped directories
//! that it shares into the utility VM under a caller-chosen `uvmpath`
//! (typically `/tmp/gcs/<id>/binds`). The container spec that the guest
//! agent receives must then point at those in-VM locations instead of the
//! host paths:
//!
//! ```text
//! spec mount:  C:\data -> /target  (bind, options: rbind, ro, uvmpath=/tmp/gcs/ID/binds)
//! mapped dir:  C:\data -> /tmp/gcs/ID/binds/target  (read-only, create in utility VM)
//! new mount:   /tmp/gcs/ID/binds/target -> /target  (bind, options: rbind, ro)
//! ```

use std::path::PathBuf;

use lcow_shared::{LcowError, LcowResult};
use oci_spec::runtime::Mount;
use serde::{Deserialize, Serialize};

const BIND_TYPE: &str = "bind";
const UVM_PATH_OPTION: &str = "uvmpath";

/// A host directory shared into the utility VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MappedDir {
    pub host_path: PathBuf,
    /// Location inside the utility VM (not inside the container).
    pub container_path: String,
    #[serde(rename = "CreateInUtilityVM")]
    pub create_in_utility_vm: bool,
    pub read_only: bool,
}

/// Output of [`translate_bind_mounts`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindTranslation {
    /// Mapped directories for the host-side container configuration.
    pub mapped_dirs: Vec<MappedDir>,
    /// The input mounts with bind sources rewritten to utility VM paths.
    pub mounts: Vec<Mount>,
}

/// Translate `mounts` for an LCOW container.
///
/// Non-bind mounts pass through unchanged. The input is not modified.
pub fn translate_bind_mounts(mounts: &[Mount]) -> LcowResult<BindTranslation> {
    let mut translation = BindTranslation::default();

    for mount in mounts {
        if mount.typ().as_deref() != Some(BIND_TYPE) {
            translation.mounts.push(mount.clone());
            continue;
        }

        let mut forwarded = Vec::new();
        let mut uvm_path = None;
        let mut read_only = false;

        for opt in mount.options().iter().flatten() {
            let (key, value) = match opt.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (opt.as_str(), None),
            };
            match key {
                UVM_PATH_OPTION => {
                    uvm_path = value.filter(|v| !v.is_empty());
                    continue;
                }
                "ro" => read_only = true,
                "rw" | "rbind" => {}
                _ => {
                    return Err(LcowError::UnsupportedMountOption {
                        option: opt.clone(),
                    });
                }
            }
            forwarded.push(opt.clone());
        }

        let destination = mount.destination().to_string_lossy().into_owned();
        let Some(uvm_path) = uvm_path else {
            return Err(LcowError::MissingUvmPath { destination });
        };
        let guest_path = join_guest_path(uvm_path, &destination);

        tracing::debug!(
            source = ?mount.source(),
            destination = %destination,
            guest_path = %guest_path,
            read_only,
            "Translated bind mount"
        );

        translation.mapped_dirs.push(MappedDir {
            host_path: mount.source().clone().unwrap_or_default(),
            container_path: guest_path.clone(),
            create_in_utility_vm: true,
            read_only,
        });

        let mut rewritten = mount.clone();
        rewritten.set_options(Some(forwarded));
        rewritten.set_source(Some(PathBuf::from(guest_path)));
        translation.mounts.push(rewritten);
    }

    Ok(translation)
}

/// Join two guest (POSIX) paths and clean the result.
///
/// Unlike [`std::path::Path::join`], an absolute `rel` is appended to
/// `base` rather than replacing it, and the host path syntax never applies.
pub fn join_guest_path(base: &str, rel: &str) -> String {
    let joined = match (base.is_empty(), rel.is_empty()) {
        (true, true) => return String::new(),
        (true, false) => rel.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{base}/{rel}"),
    };
    clean_guest_path(&joined)
}

/// Lexically normalize a POSIX path: collapse `//`, drop `.`, resolve `..`.
fn clean_guest_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            _ => parts.push(part),
        }
    }

    let body = parts.join("/");
    match (rooted, body.is_empty()) {
        (true, _) => format!("/{body}"),
        (false, true) => ".".to_string(),
        (false, false) => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_spec::runtime::MountBuilder;
    use proptest::prelude::*;

    fn bind(source: &str, destination: &str, options: &[&str]) -> Mount {
        MountBuilder::default()
            .destination(destination)
            .typ("bind")
            .source(source)
            .options(options.iter().map(|o| o.to_string()).collect::<Vec<_>>())
            .build()
            .unwrap()
    }

    fn tmpfs(destination: &str) -> Mount {
        MountBuilder::default()
            .destination(destination)
            .typ("tmpfs")
            .source("tmpfs")
            .options(vec!["nosuid".to_string(), "size=65536k".to_string()])
            .build()
            .unwrap()
    }

    #[test]
    fn test_bind_mount_translated() {
        let mounts = vec![bind(
            "C:\\data",
            "/target",
            &["rbind", "ro", "uvmpath=/tmp/gcs/abc/binds"],
        )];

        let out = translate_bind_mounts(&mounts).unwrap();

        assert_eq!(
            out.mapped_dirs,
            vec![MappedDir {
                host_path: PathBuf::from("C:\\data"),
                container_path: "/tmp/gcs/abc/binds/target".to_string(),
                create_in_utility_vm: true,
                read_only: true,
            }]
        );
        let rewritten = &out.mounts[0];
        assert_eq!(
            rewritten.source().as_deref(),
            Some(std::path::Path::new("/tmp/gcs/abc/binds/target"))
        );
        assert_eq!(
            rewritten.options().clone().unwrap(),
            vec!["rbind".to_string(), "ro".to_string()]
        );
        assert_eq!(rewritten.destination(), &PathBuf::from("/target"));
    }

    #[test]
    fn test_non_bind_mounts_pass_through() {
        let mounts = vec![
            tmpfs("/dev/shm"),
            bind("C:\\src", "/src", &["rw", "uvmpath=/binds"]),
        ];

        let out = translate_bind_mounts(&mounts).unwrap();

        assert_eq!(out.mounts.len(), 2);
        assert_eq!(out.mounts[0], mounts[0]);
        assert_eq!(out.mapped_dirs.len(), 1);
        assert!(!out.mapped_dirs[0].read_only);
    }

    #[test]
    fn test_input_not_mutated() {
        let mounts = vec![bind("C:\\src", "/src", &["uvmpath=/binds"])];
        let before = mounts.clone();
        let _ = translate_bind_mounts(&mounts).unwrap();
        assert_eq!(mounts, before);
    }

    #[test]
    fn test_unsupported_option_rejected() {
        let mounts = vec![bind("C:\\src", "/src", &["uvmpath=/binds", "nosuid"])];
        let err = translate_bind_mounts(&mounts).unwrap_err();
        assert!(
            matches!(err, LcowError::UnsupportedMountOption { ref option } if option == "nosuid")
        );
    }

    #[test]
    fn test_missing_uvmpath_rejected() {
        for options in [&["ro"][..], &["rw", "rbind"][..], &[][..], &["uvmpath="][..]] {
            let mounts = vec![bind("C:\\src", "/src", options)];
            let err = translate_bind_mounts(&mounts).unwrap_err();
            let destination = match &err {
                LcowError::MissingUvmPath { destination } => destination.as_str(),
                _ => panic!("options {options:?} gave {err}"),
            };
            assert_eq!(destination, "/src");
        }
    }

    #[test]
    fn test_join_guest_path() {
        assert_eq!(join_guest_path("/tmp/gcs/x/binds", "/target"), "/tmp/gcs/x/binds/target");
        assert_eq!(join_guest_path("/binds/", "data/"), "/binds/data");
        assert_eq!(join_guest_path("/binds", "/a/../b/./c"), "/binds/b/c");
        assert_eq!(join_guest_path("/binds", "/../../etc"), "/etc");
        assert_eq!(join_guest_path("", "/target"), "/target");
        assert_eq!(join_guest_path("binds", ""), "binds");
        assert_eq!(join_guest_path("", ""), "");
        assert_eq!(clean_guest_path("a/../.."), "..");
        assert_eq!(clean_guest_path("./"), ".");
    }

    fn mount_option() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("ro".to_string()),
            Just("rw".to_string()),
            Just("rbind".to_string()),
            "[a-z]{1,8}".prop_map(|p| format!("uvmpath=/{p}")),
        ]
    }

    proptest! {
        #[test]
        fn prop_translation_is_idempotent(
            options in prop::collection::vec(mount_option(), 0..5),
            dest in "/[a-z]{1,8}(/[a-z]{1,8}){0,2}",
        ) {
            let opts: Vec<&str> = options.iter().map(String::as_str).collect();
            let mounts = vec![tmpfs("/run"), bind("C:\\host", &dest, &opts)];

            let first = translate_bind_mounts(&mounts);
            let second = translate_bind_mounts(&mounts);

            match (first, second) {
                (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
                (Err(a), Err(b)) => prop_assert_eq!(a.to_string(), b.to_string()),
                _ => prop_assert!(false, "translation outcome differed between runs"),
            }
        }

        #[test]
        fn prop_missing_uvmpath_always_fails(
            options in prop::collection::vec(
                prop_oneof![Just("ro"), Just("rw"), Just("rbind")],
                0..4,
            ),
        ) {
            let mounts = vec![bind("C:\\host", "/dst", &options)];
            let is_missing = matches!(
                translate_bind_mounts(&mounts),
                Err(LcowError::MissingUvmPath { .. })
            );
            prop_assert!(is_missing);
        }
    }
}
