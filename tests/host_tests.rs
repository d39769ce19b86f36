//! Host configuration against a scratch host root.

mod helpers;

use helpers::{mode, read, with_admin, TestEnv};
use serial_test::serial;
use std::fs;

use homelab::host::{smb, ssh, updates, user};
use homelab::process;

const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHomelabTestKey alice@laptop";

#[test]
#[serial]
fn test_ssh_installs_hardened_config_with_backup() {
    let env = TestEnv::new();
    fs::create_dir_all(env.host("/etc/ssh")).unwrap();
    fs::write(env.host("/etc/ssh/sshd_config"), "PasswordAuthentication yes\n").unwrap();

    with_admin(|| {
        ssh::configure(
            &env.config(),
            &ssh::SshOptions {
                authorized_key: Some(KEY.to_string()),
                restart: false,
            },
        )
    })
    .unwrap();

    let installed = read(&env.host("/etc/ssh/sshd_config"));
    assert!(installed.contains("PasswordAuthentication no"));
    assert!(installed.contains("AllowUsers alice"));
    assert_eq!(read(&env.host("/etc/ssh/sshd_config.bak")), "PasswordAuthentication yes\n");
    assert!(!env.host("/etc/ssh/sshd_config.homelab-new").exists());

    let keys = env.host("/home/alice/.ssh/authorized_keys");
    assert_eq!(read(&keys), format!("{}\n", KEY));
    assert_eq!(mode(&keys), 0o600);
}

#[test]
#[serial]
fn test_ssh_refuses_lockout_without_keys() {
    let env = TestEnv::new();
    let err = with_admin(|| ssh::configure(&env.config(), &ssh::SshOptions::default()))
        .unwrap_err()
        .to_string();
    assert!(err.contains("no authorized keys"));
    assert!(!env.host("/etc/ssh/sshd_config").exists());
}

#[test]
#[serial]
fn test_ssh_backup_is_kept_on_rerun() {
    let env = TestEnv::new();
    fs::create_dir_all(env.host("/etc/ssh")).unwrap();
    fs::write(env.host("/etc/ssh/sshd_config"), "# distro original\n").unwrap();
    let options = ssh::SshOptions {
        authorized_key: Some(KEY.to_string()),
        restart: false,
    };

    with_admin(|| {
        ssh::configure(&env.config(), &options)?;
        ssh::configure(&env.config(), &options)
    })
    .unwrap();

    assert_eq!(read(&env.host("/etc/ssh/sshd_config.bak")), "# distro original\n");
    let keys = read(&env.host("/home/alice/.ssh/authorized_keys"));
    assert_eq!(keys.lines().count(), 1);
}

#[test]
fn test_updates_writes_defaults_when_missing() {
    let env = TestEnv::new();
    updates::configure(&env.config()).unwrap();

    assert_eq!(
        read(&env.host(updates::AUTO_UPGRADES)),
        updates::AUTO_UPGRADES_CONTENT
    );
    assert_eq!(
        read(&env.host(updates::UNATTENDED_UPGRADES)),
        updates::DEFAULT_UNATTENDED_CONFIG
    );
}

#[test]
fn test_updates_patches_existing_file() {
    let env = TestEnv::new();
    let path = env.host(updates::UNATTENDED_UPGRADES);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(
        &path,
        "Unattended-Upgrade::Origins-Pattern {\n//  \"origin=Debian,codename=${distro_codename},label=Debian-Security\";\n};\nUnattended-Upgrade::Automatic-Reboot \"true\";\n",
    )
    .unwrap();

    updates::configure(&env.config()).unwrap();

    let patched = read(&path);
    assert!(updates::security_enabled(&patched));
    assert!(patched.contains("Unattended-Upgrade::Automatic-Reboot \"false\";"));
    assert!(env.host("/etc/apt/apt.conf.d/50unattended-upgrades.bak").exists());
}

#[test]
fn test_smb_writes_template_when_unconfigured() {
    let env = TestEnv::new();
    let summary = smb::configure(&env.config()).unwrap();

    assert!(summary.mounted.is_empty());
    let template = env.secrets_dir.join(smb::SMB_SECRETS_FILE);
    assert!(read(&template).contains("SMB_HOST_1_SHARE_1="));
    assert_eq!(mode(&template), 0o600);
    assert!(!env.host(smb::FSTAB).exists());
}

#[test]
#[serial]
fn test_smb_prepares_shares() {
    let env = TestEnv::new();
    fs::write(env.host("/etc/fstab"), "UUID=abc / ext4 defaults 0 1\n").unwrap();
    env.write_secret_file(
        ".smb",
        "SMB_HOST_1=nas.lan\nSMB_HOST_1_USER=me\nSMB_HOST_1_PW=pa$word99\nSMB_HOST_1_SHARE_1=media\nSMB_HOST_1_SHARE_2=photos\n",
    );

    with_admin(|| smb::configure(&env.config())).unwrap();
    // Second run must not duplicate anything
    with_admin(|| smb::configure(&env.config())).unwrap();

    let credentials = env.host("/etc/.smb_nas_lan");
    assert_eq!(read(&credentials), "username=me\npassword=pa$word99\n");
    assert_eq!(mode(&credentials), 0o600);

    let fstab = read(&env.host("/etc/fstab"));
    assert!(fstab.starts_with("UUID=abc / ext4 defaults 0 1\n"));
    assert_eq!(fstab.matches("//nas.lan/media /mnt/media cifs").count(), 1);
    assert_eq!(fstab.matches("//nas.lan/photos /mnt/photos cifs").count(), 1);
    assert!(fstab.contains("uid=alice,gid=alice"));

    assert!(env.host("/mnt/media").is_dir());
    assert!(env.host("/mnt/photos").is_dir());
    assert!(read(&env.host(smb::AUTOMOUNT_UNIT)).contains("WantedBy=multi-user.target"));
}

const GROUPS: &str = "root:x:0:\nsudo:x:27:\ndocker:x:999:bob\n";

#[test]
#[serial]
fn test_user_grants_sudo_and_groups() {
    let env = TestEnv::new();
    fs::write(env.host("/etc/group"), GROUPS).unwrap();
    fs::create_dir_all(env.host("/home/alice/.ssh")).unwrap();
    fs::write(env.host("/home/alice/.ssh/id_ed25519.pub"), KEY).unwrap();

    let summary = with_admin(|| user::configure(&env.config())).unwrap();
    assert!(summary.sudoers_written);
    assert_eq!(summary.groups_joined, vec!["sudo", "docker"]);
    assert!(!summary.key_generated);

    let sudoers = env.host("/etc/sudoers.d/alice");
    assert_eq!(read(&sudoers), "alice ALL=(ALL) ALL\n");
    assert_eq!(mode(&sudoers), 0o440);
    assert!(!env.host("/etc/sudoers.d/alice.homelab-new").exists());
    assert_eq!(
        read(&env.host("/etc/group")),
        "root:x:0:\nsudo:x:27:alice\ndocker:x:999:bob,alice\n"
    );

    let rerun = with_admin(|| user::configure(&env.config())).unwrap();
    assert!(!rerun.sudoers_written);
    assert!(rerun.groups_joined.is_empty());
    assert_eq!(
        read(&env.host("/etc/group")),
        "root:x:0:\nsudo:x:27:alice\ndocker:x:999:bob,alice\n"
    );
}

#[test]
#[serial]
fn test_user_nopasswd_and_missing_docker_group() {
    let env = TestEnv::new();
    env.write_secret_file(".host", "SUDO_NOPASSWD=yes\n");
    fs::write(env.host("/etc/group"), "sudo:x:27:alice\n").unwrap();
    fs::create_dir_all(env.host("/home/alice/.ssh")).unwrap();
    fs::write(env.host("/home/alice/.ssh/id_ed25519"), "private").unwrap();

    let summary = with_admin(|| user::configure(&env.config())).unwrap();
    assert!(summary.groups_joined.is_empty());
    assert_eq!(
        read(&env.host("/etc/sudoers.d/alice")),
        "alice ALL=(ALL) NOPASSWD:ALL\n"
    );
    assert_eq!(read(&env.host("/etc/group")), "sudo:x:27:alice\n");
}

#[test]
#[serial]
fn test_user_generates_ed25519_key() {
    if !process::exists("ssh-keygen") {
        return;
    }
    let env = TestEnv::new();
    fs::write(env.host("/etc/group"), GROUPS).unwrap();

    let summary = with_admin(|| user::configure(&env.config())).unwrap();
    assert!(summary.key_generated);

    let ssh_dir = env.host("/home/alice/.ssh");
    assert_eq!(mode(&ssh_dir), 0o700);
    assert!(ssh_dir.join("id_ed25519").is_file());
    assert!(read(&ssh_dir.join("id_ed25519.pub")).starts_with("ssh-ed25519 "));
}
