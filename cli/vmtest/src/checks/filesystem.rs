//! Filesystem permission checks on a freshly booted machine.

use anyhow::{Context, Result};
use plfm_harness::TestResult;

use crate::cluster::TestCluster;
use crate::error::RegistryError;
use crate::register::{Registry, TestDefinition};

const USER_DATA: &str = "#cloud-config";

/// Never descended into.
const VIRTUAL: &[&str] = &["/proc", "/sys", "/var/lib/docker", "/var/lib/rkt"];

/// Setuid binaries shipped on purpose.
const SUID_ALLOWED: &[&str] = &[
    "/usr/bin/chage",
    "/usr/bin/chfn",
    "/usr/bin/chsh",
    "/usr/bin/expiry",
    "/usr/bin/gpasswd",
    "/usr/bin/ksu",
    "/usr/bin/man",
    "/usr/bin/mandb",
    "/usr/bin/mount",
    "/usr/bin/newgrp",
    "/usr/bin/passwd",
    "/usr/bin/pkexec",
    "/usr/bin/umount",
    "/usr/bin/su",
    "/usr/bin/sudo",
    "/usr/lib/polkit-1/polkit-agent-helper-1",
    "/usr/lib64/polkit-1/polkit-agent-helper-1",
    "/usr/libexec/dbus-daemon-launch-helper",
    "/usr/sbin/mount.nfs",
    "/usr/sbin/unix_chkpwd",
];

/// Sticky directories, possibly with sticky children.
const STICKY_ALLOWED: &[&str] = &["/dev/mqueue", "/dev/shm", "/media", "/tmp", "/var/tmp"];

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    let tests = [
        TestDefinition::new("filesystem.deadlinks", dead_links),
        TestDefinition::new("filesystem.suid", suid_files),
        TestDefinition::new("filesystem.sgid", sgid_files),
        TestDefinition::new("filesystem.writablefiles", writable_files),
        TestDefinition::new("filesystem.writabledirs", writable_dirs),
        TestDefinition::new("filesystem.stickydirs", sticky_dirs),
    ];
    for def in tests {
        registry.register(def.cluster_size(1).user_data(USER_DATA))?;
    }
    Ok(())
}

/// `find` over the root filesystem, pruning `prune` and printing whatever
/// matches `predicate`.
pub fn find_command(prune: &[&str], predicate: &str) -> String {
    let pruned: Vec<String> = prune.iter().map(|p| format!("-path {p} -prune")).collect();
    format!(
        "sudo find / -ignore_readdir_race {} -o {predicate} -print",
        pruned.join(" -o ")
    )
}

/// Lines of `output` not in `allowed`.
pub fn unexpected<'a>(output: &'a str, allowed: &[&str]) -> Vec<&'a str> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !allowed.contains(line))
        .collect()
}

async fn expect_none(c: &TestCluster, command: &str, allowed: &[&str], what: &str) -> Result<()> {
    let machine = c.machines().first().context("no machines provisioned")?;
    let out = machine
        .ssh(command)
        .await
        .with_context(|| format!("running {command}"))?;
    let out = String::from_utf8_lossy(&out);

    let found = unexpected(&out, allowed);
    if !found.is_empty() {
        anyhow::bail!("{what} found: {found:?}");
    }
    Ok(())
}

async fn dead_links(c: TestCluster) -> TestResult {
    let prune = ["/dev", "/proc", "/run/udev/watch", "/sys", "/var/lib/docker", "/var/lib/rkt"];
    let command = find_command(&prune, "-xtype l");
    let result = expect_none(&c, &command, &[], "Dead symbolic links").await;
    c.check(result)
}

async fn suid_files(c: TestCluster) -> TestResult {
    let command = find_command(VIRTUAL, "-type f -perm -4000");
    let result = expect_none(&c, &command, SUID_ALLOWED, "Unknown SUID files").await;
    c.check(result)
}

async fn sgid_files(c: TestCluster) -> TestResult {
    let command = find_command(VIRTUAL, "-type f -perm -2000");
    let result = expect_none(&c, &command, &[], "Unknown SGID files").await;
    c.check(result)
}

async fn writable_files(c: TestCluster) -> TestResult {
    let command = find_command(VIRTUAL, "-type f -perm -0002");
    let result = expect_none(&c, &command, &[], "Unknown writable files").await;
    c.check(result)
}

async fn writable_dirs(c: TestCluster) -> TestResult {
    let command = find_command(VIRTUAL, "-type d -perm -0002 -a ! -perm -1000");
    let result = expect_none(&c, &command, &[], "Unknown writable directories").await;
    c.check(result)
}

async fn sticky_dirs(c: TestCluster) -> TestResult {
    let prune: Vec<&str> = VIRTUAL.iter().chain(STICKY_ALLOWED).copied().collect();
    let command = find_command(&prune, "-type d -perm /1000");
    let result = expect_none(&c, &command, &[], "Unknown sticky directories").await;
    c.check(result)
}
