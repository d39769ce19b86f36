//! Bootloader patching for unattended installs.
//!
//! Debian installer ISOs boot through isolinux (BIOS) and GRUB (UEFI). Both
//! get the preseed boot parameters appended to their install entries and a
//! short menu timeout, so the installer starts without a keypress.

use regex::Regex;
use std::sync::OnceLock;

use super::preseed::PRESEED_ISO_PATH;

/// Kernel parameters that make d-i load the preseed from the install medium.
pub fn boot_params() -> String {
    format!(
        "auto=true priority=critical preseed/file=/cdrom{}",
        PRESEED_ISO_PATH
    )
}

/// Bootloader files that may exist on a Debian ISO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootFile {
    /// `isolinux.cfg`: carries the menu timeout.
    IsolinuxMain,
    /// `txt.cfg` / `gtk.cfg`: carry the install entries.
    IsolinuxMenu,
    /// `grub.cfg`: UEFI menu, entries and timeout.
    Grub,
}

/// `(path inside the ISO, kind)` for every file worth patching.
pub const BOOT_FILES: &[(&str, BootFile)] = &[
    ("/isolinux/isolinux.cfg", BootFile::IsolinuxMain),
    ("/isolinux/txt.cfg", BootFile::IsolinuxMenu),
    ("/isolinux/gtk.cfg", BootFile::IsolinuxMenu),
    ("/boot/grub/grub.cfg", BootFile::Grub),
];

/// Outcome of patching one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patched {
    pub content: String,
    /// Number of kernel command lines that received the parameters.
    pub entries: usize,
}

/// Patch a bootloader file according to its kind.
pub fn patch(kind: BootFile, content: &str, timeout_secs: u32) -> Patched {
    let params = boot_params();
    match kind {
        BootFile::IsolinuxMain => Patched {
            content: set_isolinux_timeout(content, timeout_secs),
            entries: 0,
        },
        BootFile::IsolinuxMenu => patch_lines(content, &params, |t| {
            t.starts_with("append") && t.contains("initrd=")
        }),
        BootFile::Grub => {
            let patched = patch_lines(content, &params, |t| {
                t.starts_with("linux") && t.contains("/install")
            });
            Patched {
                content: set_grub_timeout(&patched.content, timeout_secs),
                entries: patched.entries,
            }
        }
    }
}

/// Insert `params` into a kernel command line.
///
/// Parameters go before the ` ---` separator (everything after it is passed
/// on to the installed system). Returns `None` when the line already loads
/// a preseed.
pub fn inject_boot_params(line: &str, params: &str) -> Option<String> {
    if line.contains("preseed/file=") || line.contains("preseed/url=") {
        return None;
    }
    match line.find(" ---") {
        Some(idx) => {
            let (head, tail) = line.split_at(idx);
            Some(format!("{} {}{}", head.trim_end(), params, tail))
        }
        None => Some(format!("{} {}", line.trim_end(), params)),
    }
}

/// Apply [`inject_boot_params`] to every matching line, skipping rescue
/// entries.
fn patch_lines<F>(content: &str, params: &str, is_kernel_line: F) -> Patched
where
    F: Fn(&str) -> bool,
{
    let mut entries = 0;
    let lines: Vec<String> = content
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if is_kernel_line(trimmed) && !trimmed.contains("rescue/enable=true") {
                if let Some(patched) = inject_boot_params(line, params) {
                    entries += 1;
                    return patched;
                }
            }
            line.to_string()
        })
        .collect();

    Patched {
        content: rejoin(lines, content),
        entries,
    }
}

/// Set the isolinux menu timeout. isolinux counts in tenths of a second and
/// treats 0 as "wait forever", so the minimum is one tenth.
pub fn set_isolinux_timeout(content: &str, secs: u32) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?mi)^[ \t]*timeout[ \t]+\d+[ \t]*$").expect("valid regex"));

    let tenths = secs.saturating_mul(10).max(1);
    let line = format!("timeout {}", tenths);
    if re.is_match(content) {
        re.replace_all(content, line.as_str()).into_owned()
    } else {
        let mut out = content.to_string();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&line);
        out.push('\n');
        out
    }
}

/// Set `set timeout=N` in grub.cfg, adding it at the top if absent.
pub fn set_grub_timeout(content: &str, secs: u32) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?m)^([ \t]*)set timeout=\S*[ \t]*$").expect("valid regex"));

    if re.is_match(content) {
        re.replace_all(content, format!("${{1}}set timeout={}", secs).as_str())
            .into_owned()
    } else {
        format!("set timeout={}\n{}", secs, content)
    }
}

fn rejoin(lines: Vec<String>, original: &str) -> String {
    let mut out = lines.join("\n");
    if original.ends_with('\n') {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXT_CFG: &str = "default install\n\
label install\n\
\tmenu label ^Install\n\
\tkernel /install.amd/vmlinuz\n\
\tappend vga=788 initrd=/install.amd/initrd.gz --- quiet \n";

    const GRUB_CFG: &str = "if loadfont $font ; then\n\
  set gfxmode=800x600\n\
fi\n\
menuentry --hotkey=i 'Install' {\n\
    set background_color=black\n\
    linux    /install.amd/vmlinuz vga=788 --- quiet\n\
    initrd   /install.amd/initrd.gz\n\
}\n\
menuentry --hotkey=r 'Rescue mode' {\n\
    linux    /install.amd/vmlinuz vga=788 rescue/enable=true --- quiet\n\
    initrd   /install.amd/initrd.gz\n\
}\n";

    #[test]
    fn test_inject_before_separator() {
        let line = "\tappend vga=788 initrd=/install.amd/initrd.gz --- quiet";
        let patched = inject_boot_params(line, "auto=true").unwrap();
        assert_eq!(
            patched,
            "\tappend vga=788 initrd=/install.amd/initrd.gz auto=true --- quiet"
        );
    }

    #[test]
    fn test_inject_without_separator_appends() {
        let patched = inject_boot_params("append initrd=/initrd.gz  ", "auto=true").unwrap();
        assert_eq!(patched, "append initrd=/initrd.gz auto=true");
    }

    #[test]
    fn test_inject_is_idempotent() {
        let line = "append initrd=/initrd.gz preseed/file=/cdrom/preseed.cfg --- quiet";
        assert!(inject_boot_params(line, "auto=true").is_none());
    }

    #[test]
    fn test_patch_isolinux_menu() {
        let patched = patch(BootFile::IsolinuxMenu, TXT_CFG, 1);
        assert_eq!(patched.entries, 1);
        assert!(patched.content.contains(
            "initrd=/install.amd/initrd.gz auto=true priority=critical preseed/file=/cdrom/preseed.cfg --- quiet"
        ));
        // kernel line untouched
        assert!(patched.content.contains("\tkernel /install.amd/vmlinuz\n"));
        assert!(patched.content.ends_with('\n'));

        let again = patch(BootFile::IsolinuxMenu, &patched.content, 1);
        assert_eq!(again.entries, 0);
        assert_eq!(again.content, patched.content);
    }

    #[test]
    fn test_patch_grub_skips_rescue_and_sets_timeout() {
        let patched = patch(BootFile::Grub, GRUB_CFG, 3);
        assert_eq!(patched.entries, 1);
        assert!(patched.content.starts_with("set timeout=3\n"));
        assert!(patched
            .content
            .contains("vga=788 auto=true priority=critical preseed/file=/cdrom/preseed.cfg --- quiet"));
        assert!(patched
            .content
            .contains("vga=788 rescue/enable=true --- quiet\n"));
    }

    #[test]
    fn test_grub_timeout_replaced_in_place() {
        let content = "set default=0\n  set timeout=30\nmenuentry 'x' {\n}\n";
        let out = set_grub_timeout(content, 5);
        assert_eq!(out, "set default=0\n  set timeout=5\nmenuentry 'x' {\n}\n");
    }

    #[test]
    fn test_isolinux_timeout() {
        let main = "path \ninclude menu.cfg\ndefault vesamenu.c32\nprompt 0\ntimeout 0\n";
        let out = set_isolinux_timeout(main, 2);
        assert!(out.contains("\ntimeout 20\n"));
        assert!(!out.contains("timeout 0"));

        let out = set_isolinux_timeout("default install", 0);
        assert_eq!(out, "default install\ntimeout 1\n");
    }

    #[test]
    fn test_isolinux_timeout_saturates() {
        let out = set_isolinux_timeout("timeout 0\n", 500_000_000);
        assert_eq!(out, format!("timeout {}\n", u32::MAX));
    }
}
