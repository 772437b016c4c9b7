//! Integration tests for scratch disk provisioning.
//!
//! Runs the provisioner against a scripted in-memory utility VM:
//! - sizing and cache behaviour
//! - the exact guest call sequence of an uncached run
//! - cleanup (hot-remove exactly once) on every failure path

use std::fs;
use std::path::{Path, PathBuf};

use lcow::uvm::{ScsiAddress, UtilityVm};
use lcow::{
    CommandFailure, LcowError, ScratchOptions, ScratchOrigin, ScratchProvisioner, ScratchState,
};
use lcow_test_utils::{
    FailingImageCreator, FakeUtilityVm, GuestCall, MarkerImageCreator, ProcessScript,
};
use tempfile::TempDir;

// ============================================================================
// TEST FIXTURES
// ============================================================================

struct TestContext {
    dest: PathBuf,
    cache: PathBuf,
    _temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self {
            dest: temp_dir.path().join("sandbox.vhdx"),
            cache: temp_dir.path().join("cache").join("sandbox.vhdx"),
            _temp_dir: temp_dir,
        }
    }
}

fn provisioner() -> ScratchProvisioner<MarkerImageCreator> {
    ScratchProvisioner::with_creator(ScratchOptions::default(), MarkerImageCreator)
}

fn guest(vm: &FakeUtilityVm) -> Option<&dyn UtilityVm> {
    Some(vm)
}

fn process(args: &[&str]) -> GuestCall {
    GuestCall::Process {
        args: args.iter().map(|a| a.to_string()).collect(),
    }
}

fn close(args: &[&str]) -> GuestCall {
    GuestCall::Close {
        args: args.iter().map(|a| a.to_string()).collect(),
    }
}

const VALIDATE: &[&str] = &["test", "-d", "/sys/bus/scsi/devices/0:0:0:1"];
const LOCATE: &[&str] = &["ls", "/sys/bus/scsi/devices/0:0:0:1/block"];
const FORMAT: &[&str] = &[
    "mkfs.ext4",
    "-q",
    "-E",
    "lazy_itable_init=1",
    "-O",
    "^has_journal,sparse_super2,uninit_bg,^resize_inode",
    "/dev/sdb",
];

fn assert_removed_once(vm: &FakeUtilityVm, dest: &Path) {
    assert_eq!(vm.remove_count(), 1, "calls: {:?}", vm.calls());
    assert_eq!(
        vm.calls().last(),
        Some(&GuestCall::RemoveScsi {
            path: dest.to_path_buf(),
            address: ScsiAddress::new(0, 1),
        })
    );
}

// ============================================================================
// SIZING AND CACHE
// ============================================================================

#[tokio::test]
async fn small_request_is_raised_to_default_size() {
    let ctx = TestContext::new();
    let vm = FakeUtilityVm::new();

    let disk = provisioner()
        .provision(guest(&vm), &ctx.dest, 10, None)
        .await
        .unwrap();

    assert_eq!(disk.capacity_gb, 20);
    assert_eq!(disk.block_size_mb, 1);
    assert_eq!(
        fs::read_to_string(&ctx.dest).unwrap(),
        MarkerImageCreator::marker(20, 1)
    );
}

#[tokio::test]
async fn cache_hit_copies_without_guest_calls() {
    let ctx = TestContext::new();
    fs::create_dir_all(ctx.cache.parent().unwrap()).unwrap();
    fs::write(&ctx.cache, b"formatted ext4 image").unwrap();
    let vm = FakeUtilityVm::new();

    let disk = provisioner()
        .provision(guest(&vm), &ctx.dest, 20, Some(&ctx.cache))
        .await
        .unwrap();

    assert!(vm.calls().is_empty(), "calls: {:?}", vm.calls());
    assert_eq!(disk.origin, ScratchOrigin::Cache);
    assert!(disk.from_cache());
    assert!(!disk.cache_seeded);
    assert_eq!(disk.trail, vec![ScratchState::CacheCheck, ScratchState::Done]);
    assert_eq!(fs::read(&ctx.dest).unwrap(), b"formatted ext4 image");
    assert_eq!(fs::read(&ctx.cache).unwrap(), b"formatted ext4 image");
}

#[tokio::test]
async fn cache_hit_needs_no_utility_vm() {
    let ctx = TestContext::new();
    fs::create_dir_all(ctx.cache.parent().unwrap()).unwrap();
    fs::write(&ctx.cache, b"cached").unwrap();

    let disk = provisioner()
        .provision(None, &ctx.dest, 5, Some(&ctx.cache))
        .await
        .unwrap();

    assert_eq!(disk.capacity_gb, 20);
    assert_eq!(fs::read(&ctx.dest).unwrap(), b"cached");
}

#[tokio::test]
async fn non_default_size_never_touches_cache() {
    let ctx = TestContext::new();
    fs::create_dir_all(ctx.cache.parent().unwrap()).unwrap();
    fs::write(&ctx.cache, b"cached 20GB image").unwrap();
    let vm = FakeUtilityVm::new();

    let disk = provisioner()
        .provision(guest(&vm), &ctx.dest, 64, Some(&ctx.cache))
        .await
        .unwrap();

    assert_eq!(disk.capacity_gb, 64);
    assert!(!disk.cache_seeded);
    assert!(!disk.trail.contains(&ScratchState::CacheSeed));
    assert_eq!(
        fs::read_to_string(&ctx.dest).unwrap(),
        MarkerImageCreator::marker(64, 1)
    );
    assert_eq!(fs::read(&ctx.cache).unwrap(), b"cached 20GB image");
}

#[tokio::test]
async fn non_default_size_does_not_seed_missing_cache() {
    let ctx = TestContext::new();
    let vm = FakeUtilityVm::new();

    provisioner()
        .provision(guest(&vm), &ctx.dest, 30, Some(&ctx.cache))
        .await
        .unwrap();

    assert!(!ctx.cache.exists());
}

#[tokio::test]
async fn empty_cache_path_means_no_cache() {
    let ctx = TestContext::new();
    let vm = FakeUtilityVm::new();

    let disk = provisioner()
        .provision(guest(&vm), &ctx.dest, 20, Some(Path::new("")))
        .await
        .unwrap();

    assert!(!disk.cache_seeded);
    assert_eq!(vm.programs(), vec!["test", "ls", "mkfs.ext4"]);
}

// ============================================================================
// FULL SEQUENCE
// ============================================================================

#[tokio::test]
async fn uncached_run_follows_exact_guest_sequence() {
    let ctx = TestContext::new();
    let vm = FakeUtilityVm::new();

    let disk = provisioner()
        .provision(guest(&vm), &ctx.dest, 20, Some(&ctx.cache))
        .await
        .unwrap();

    assert_eq!(
        vm.calls(),
        vec![
            GuestCall::AddScsi {
                path: ctx.dest.clone()
            },
            process(VALIDATE),
            close(VALIDATE),
            process(LOCATE),
            close(LOCATE),
            process(FORMAT),
            close(FORMAT),
            GuestCall::RemoveScsi {
                path: ctx.dest.clone(),
                address: ScsiAddress::new(0, 1),
            },
        ]
    );
    assert_eq!(
        disk.trail,
        vec![
            ScratchState::CacheCheck,
            ScratchState::LocalCreate,
            ScratchState::Attach,
            ScratchState::Validate,
            ScratchState::LocateDevice,
            ScratchState::Format,
            ScratchState::Detach,
            ScratchState::CacheSeed,
            ScratchState::Done,
        ]
    );
    assert_eq!(disk.device(), Some("/dev/sdb"));
    assert!(disk.cache_seeded);
    assert_eq!(fs::read(&ctx.cache).unwrap(), fs::read(&ctx.dest).unwrap());
}

#[tokio::test]
async fn device_name_and_address_come_from_guest() {
    let ctx = TestContext::new();
    let vm = FakeUtilityVm::new()
        .with_address(ScsiAddress::new(1, 7))
        .script("ls", ProcessScript::stdout("  sdh\n"));

    let disk = provisioner()
        .provision(guest(&vm), &ctx.dest, 20, None)
        .await
        .unwrap();

    assert_eq!(
        disk.origin,
        ScratchOrigin::Formatted {
            address: ScsiAddress::new(1, 7),
            device: "/dev/sdh".to_string(),
        }
    );
    assert!(vm.calls().contains(&process(&["test", "-d", "/sys/bus/scsi/devices/1:0:0:7"])));
    assert!(vm.calls().contains(&process(&["ls", "/sys/bus/scsi/devices/1:0:0:7/block"])));
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn format_failure_reports_stderr_after_detach() {
    let ctx = TestContext::new();
    let vm = FakeUtilityVm::new().script(
        "mkfs.ext4",
        ProcessScript::failure(1, "mkfs: no such device\n"),
    );

    let err = provisioner()
        .provision(guest(&vm), &ctx.dest, 20, Some(&ctx.cache))
        .await
        .unwrap_err();

    match &err {
        LcowError::FormatFailed { stderr, failure, .. } => {
            assert_eq!(stderr, "mkfs: no such device");
            assert!(matches!(failure, CommandFailure::NonZeroExit { code: 1, .. }));
        }
        other => panic!("expected FormatFailed, got {other:?}"),
    }
    assert!(err.to_string().contains("mkfs: no such device"));
    assert_removed_once(&vm, &ctx.dest);
    assert!(!ctx.cache.exists());
}

/// (error variant, command failure variant) for the remote step errors.
fn failure_kind(err: &LcowError) -> (&'static str, &'static str) {
    let (step, failure) = match err {
        LcowError::AttachValidationFailed { failure, .. } => ("validate", failure),
        LcowError::DeviceLookupFailed { failure, .. } => ("locate", failure),
        LcowError::FormatFailed { failure, .. } => ("format", failure),
        _ => return ("other", "other"),
    };
    let kind = match failure {
        CommandFailure::Start { .. } => "start",
        CommandFailure::Timeout { .. } => "timeout",
        CommandFailure::ExitCode { .. } => "exit_code",
        CommandFailure::NonZeroExit { .. } => "non_zero",
        CommandFailure::UnexpectedOutput { .. } => "output",
    };
    (step, kind)
}

#[tokio::test]
async fn every_failure_after_attach_detaches_exactly_once() {
    let cases = vec![
        ("test", ProcessScript::StartError("no guest agent".into()), ("validate", "start")),
        ("test", ProcessScript::exit(1), ("validate", "non_zero")),
        ("test", ProcessScript::WaitError("bridge closed".into()), ("validate", "exit_code")),
        ("ls", ProcessScript::StartError("no guest agent".into()), ("locate", "start")),
        ("ls", ProcessScript::exit(2), ("locate", "non_zero")),
        ("ls", ProcessScript::stdout(""), ("locate", "output")),
        ("ls", ProcessScript::stdout("sdb\nsdc\n"), ("locate", "output")),
        ("mkfs.ext4", ProcessScript::StartError("no guest agent".into()), ("format", "start")),
        ("mkfs.ext4", ProcessScript::exit(1), ("format", "non_zero")),
    ];

    for (program, script, expected) in cases {
        let ctx = TestContext::new();
        let vm = FakeUtilityVm::new().script(program, script.clone());

        let err = provisioner()
            .provision(guest(&vm), &ctx.dest, 20, Some(&ctx.cache))
            .await
            .unwrap_err();

        assert_eq!(failure_kind(&err), expected, "{program} {script:?} gave {err:?}");
        assert_removed_once(&vm, &ctx.dest);
        assert!(!ctx.cache.exists(), "cache seeded after {program} {script:?}");
    }
}

#[tokio::test]
async fn started_processes_are_always_closed() {
    let ctx = TestContext::new();
    let vm = FakeUtilityVm::new().script("ls", ProcessScript::WaitError("bridge closed".into()));

    provisioner()
        .provision(guest(&vm), &ctx.dest, 20, None)
        .await
        .unwrap_err();

    let started = vm.count(|c| matches!(c, GuestCall::Process { .. }));
    let closed = vm.count(|c| matches!(c, GuestCall::Close { .. }));
    assert_eq!(started, 2);
    assert_eq!(closed, 2);
}

#[tokio::test(start_paused = true)]
async fn hung_validation_times_out_and_detaches() {
    let ctx = TestContext::new();
    let vm = FakeUtilityVm::new().script("test", ProcessScript::Hang);

    let err = provisioner()
        .provision(guest(&vm), &ctx.dest, 20, None)
        .await
        .unwrap_err();

    match &err {
        LcowError::AttachValidationFailed { failure, .. } => {
            assert!(failure.is_timeout(), "{failure}");
            assert!(failure.to_string().contains("240s"), "{failure}");
        }
        other => panic!("expected AttachValidationFailed, got {other:?}"),
    }
    assert!(vm.calls().contains(&close(VALIDATE)));
    assert_removed_once(&vm, &ctx.dest);
}

#[tokio::test(start_paused = true)]
async fn command_timeout_is_configurable() {
    let ctx = TestContext::new();
    let vm = FakeUtilityVm::new().script("mkfs.ext4", ProcessScript::Hang);
    let options = ScratchOptions {
        command_timeout_secs: 5,
        ..Default::default()
    };

    let err = ScratchProvisioner::with_creator(options, MarkerImageCreator)
        .provision(guest(&vm), &ctx.dest, 20, None)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("5s"), "{err}");
    assert_removed_once(&vm, &ctx.dest);
}

#[tokio::test]
async fn detach_failure_after_format_is_reported() {
    let ctx = TestContext::new();
    let vm = FakeUtilityVm::new().fail_detach("device busy");

    let err = provisioner()
        .provision(guest(&vm), &ctx.dest, 20, Some(&ctx.cache))
        .await
        .unwrap_err();

    assert!(matches!(err, LcowError::DetachFailed { .. }), "{err:?}");
    assert!(err.to_string().contains("device busy"), "{err}");
    assert_eq!(vm.remove_count(), 1);
    assert!(!ctx.cache.exists());
}

#[tokio::test]
async fn detach_failure_on_error_path_keeps_original_error() {
    let ctx = TestContext::new();
    let vm = FakeUtilityVm::new()
        .fail_detach("device busy")
        .script("mkfs.ext4", ProcessScript::failure(1, "bad superblock"));

    let err = provisioner()
        .provision(guest(&vm), &ctx.dest, 20, None)
        .await
        .unwrap_err();

    assert!(matches!(err, LcowError::FormatFailed { .. }), "{err:?}");
    assert_eq!(vm.remove_count(), 1);
}

#[tokio::test]
async fn attach_failure_has_nothing_to_detach() {
    let ctx = TestContext::new();
    let vm = FakeUtilityVm::new().fail_attach("no free LUN");

    let err = provisioner()
        .provision(guest(&vm), &ctx.dest, 20, None)
        .await
        .unwrap_err();

    assert!(matches!(err, LcowError::AttachFailed { .. }), "{err:?}");
    assert!(err.to_string().contains("no free LUN"), "{err}");
    assert_eq!(vm.remove_count(), 0);
    assert!(vm.programs().is_empty());
}

#[tokio::test]
async fn missing_utility_vm_fails_before_creating_image() {
    let ctx = TestContext::new();

    let err = provisioner()
        .provision(None, &ctx.dest, 20, Some(&ctx.cache))
        .await
        .unwrap_err();

    assert!(
        matches!(err, LcowError::NoGuestAvailable { .. }),
        "{err:?}"
    );
    assert!(err.to_string().contains("no utility VM supplied"));
    assert!(!ctx.dest.exists());
}

#[tokio::test]
async fn image_creation_failure_makes_no_guest_calls() {
    let ctx = TestContext::new();
    let vm = FakeUtilityVm::new();

    let err = ScratchProvisioner::with_creator(ScratchOptions::default(), FailingImageCreator)
        .provision(guest(&vm), &ctx.dest, 20, None)
        .await
        .unwrap_err();

    assert!(
        matches!(err, LcowError::DiskImageCreateFailed { .. }),
        "{err:?}"
    );
    assert!(vm.calls().is_empty());
}

#[tokio::test]
async fn cache_copy_failure_is_reported() {
    let ctx = TestContext::new();
    // A directory at the cache path exists but cannot be copied as a file.
    fs::create_dir_all(&ctx.cache).unwrap();
    let vm = FakeUtilityVm::new();

    let err = provisioner()
        .provision(guest(&vm), &ctx.dest, 20, Some(&ctx.cache))
        .await
        .unwrap_err();

    assert!(matches!(err, LcowError::CacheCopyFailed { .. }), "{err:?}");
    assert!(vm.calls().is_empty());
}

#[tokio::test]
async fn cache_seed_failure_is_reported_after_detach() {
    let ctx = TestContext::new();
    // The cache directory is a regular file, so the seed copy cannot land.
    let cache_dir = ctx.cache.parent().unwrap();
    fs::write(cache_dir, b"not a directory").unwrap();
    let vm = FakeUtilityVm::new();

    let err = provisioner()
        .provision(guest(&vm), &ctx.dest, 20, Some(&ctx.cache))
        .await
        .unwrap_err();

    match &err {
        LcowError::CacheSeedFailed { cache, dest, .. } => {
            assert_eq!(cache, &ctx.cache);
            assert_eq!(dest, &ctx.dest);
        }
        other => panic!("expected CacheSeedFailed, got {other:?}"),
    }
    assert_eq!(vm.remove_count(), 1);
    assert!(ctx.dest.exists(), "formatted image stays in place");
}
