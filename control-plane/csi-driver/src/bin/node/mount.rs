//! Bind mounts and the mount table.
use nix::errno::Errno;
use std::{fs, io, path::Path};
use sys_mount::{unmount, Mount, MountFlags, UnmountFlags};
use tracing::{debug, info};

const PROC_MOUNTS: &str = "/proc/self/mounts";

/// An entry of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MountInfo {
    pub(crate) source: String,
    pub(crate) dest: String,
    pub(crate) fstype: String,
    pub(crate) options: Vec<String>,
}

impl MountInfo {
    /// Whether the mount is read only.
    pub(crate) fn readonly(&self) -> bool {
        self.options.iter().any(|option| option == "ro")
    }
}

/// Undo the octal escapes the kernel applies to spaces, tabs, newlines and backslashes.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1 .. i + 4];
            if digits.iter().all(|c| (b'0' ..= b'7').contains(c)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, c| acc * 8 + u32::from(c - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse the content of a mount table in the `/proc/self/mounts` format.
pub(crate) fn parse_mounts(content: &str) -> Vec<MountInfo> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let dest = fields.next()?;
            let fstype = fields.next()?;
            let options = fields.next()?;
            Some(MountInfo {
                source: unescape(source),
                dest: unescape(dest),
                fstype: fstype.to_string(),
                options: options.split(',').map(String::from).collect(),
            })
        })
        .collect()
}

/// Find the most recent mount on `target`, if any.
pub(crate) fn find_mount(target: &str) -> io::Result<Option<MountInfo>> {
    let content = fs::read_to_string(PROC_MOUNTS)?;
    let target = target.trim_end_matches('/');
    Ok(parse_mounts(&content)
        .into_iter()
        .rev()
        .find(|mount| mount.dest == target))
}

/// Bind mount `source` onto `target`, read only when asked.
pub(crate) fn bind_mount(source: &str, target: &str, readonly: bool) -> io::Result<()> {
    Mount::builder()
        .fstype("none")
        .flags(MountFlags::BIND)
        .mount(source, target)?;
    info!(source, target, "Bind mounted");

    // The read only flag is ignored by the initial bind mount.
    if readonly {
        if let Err(error) = Mount::builder()
            .fstype("none")
            .flags(MountFlags::BIND | MountFlags::REMOUNT | MountFlags::RDONLY)
            .mount("none", target)
        {
            let _ = bind_unmount(target);
            return Err(error);
        }
        debug!(target, "Remounted read only");
    }
    Ok(())
}

/// Unmount `target`. A target which is no longer mounted is not an error.
pub(crate) fn bind_unmount(target: &str) -> io::Result<()> {
    match unmount(target, UnmountFlags::empty()) {
        Ok(()) => info!(target, "Unmounted"),
        Err(error) if error.raw_os_error().map(Errno::from_i32) == Some(Errno::EINVAL) => {
            debug!(target, "Target is no longer mounted");
        }
        Err(error) => return Err(error),
    }
    Ok(())
}

/// Create the target directory of a mount.
pub(crate) fn create_target(target: &str) -> io::Result<()> {
    if Path::new(target).is_dir() {
        return Ok(());
    }
    fs::create_dir_all(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTS: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
fs1 /ibm/fs1 gpfs rw,relatime 0 0
fs1 /var/lib/kubelet/pods/1/volumes/kubernetes.io~csi/pvc-1/mount gpfs rw,relatime 0 0
fs1 /var/lib/kubelet/pods/1/volumes/kubernetes.io~csi/pvc\\0402/mount gpfs ro,relatime 0 0
";

    #[test]
    fn mount_table() {
        let mounts = parse_mounts(MOUNTS);
        assert_eq!(mounts.len(), 4);
        assert_eq!(mounts[1].source, "fs1");
        assert_eq!(mounts[1].dest, "/ibm/fs1");
        assert_eq!(mounts[1].fstype, "gpfs");
        assert!(!mounts[1].readonly());
        assert_eq!(
            mounts[3].dest,
            "/var/lib/kubelet/pods/1/volumes/kubernetes.io~csi/pvc 2/mount"
        );
        assert!(mounts[3].readonly());
    }

    #[test]
    fn escapes() {
        assert_eq!(unescape("a\\040b"), "a b");
        assert_eq!(unescape("a\\011b\\134"), "a\tb\\");
        assert_eq!(unescape("trailing\\"), "trailing\\");
        assert_eq!(unescape("a\\09"), "a\\09");
        assert!(parse_mounts("broken line\n").is_empty());
    }
}
