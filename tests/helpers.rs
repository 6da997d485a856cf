//! Shared test utilities: a scratch environment with stubbed external
//! commands so the pipeline runs without root, network, or real OS tooling.
//!
//! Stub scripts are placed on a prepended PATH and append one line per
//! invocation to a call log, letting tests assert which tools ran and how
//! often. Tests using a TestEnv must be `#[serial]` because PATH is
//! process-global.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use limeiso::config::Config;
use limeiso::resolve::{ResolveError, Resolver};

/// Test environment with stubbed external commands.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Where stub invocations are logged, one line per call.
    pub calls_log: PathBuf,
    /// Builder configuration pointing into the temp directory.
    pub config: Config,
    saved_path: String,
}

impl TestEnv {
    /// Create a new environment and prepend its stub directory to PATH.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let stub_bin = base.join("stub-bin");
        let calls_log = base.join("calls.log");
        let assets = base.join("assets");
        fs::create_dir_all(&stub_bin).unwrap();
        fs::create_dir_all(&assets).unwrap();

        write_stubs(&stub_bin, &calls_log);

        // Boot assets the assembly phase copies from the host.
        for name in ["logo.png", "isolinux.bin", "ldlinux.c32", "grubx64.efi", "isohdpfx.bin"] {
            fs::write(assets.join(name), format!("stub asset {}", name)).unwrap();
        }

        let config = Config {
            scratch_dir: base.join("scratch"),
            output_dir: base.join("output"),
            cache_dir: Some(base.join("cache")),
            splash_logo: assets.join("logo.png"),
            isolinux_bin: assets.join("isolinux.bin"),
            ldlinux_c32: assets.join("ldlinux.c32"),
            grub_efi: assets.join("grubx64.efi"),
            isohdpfx_bin: assets.join("isohdpfx.bin"),
        };
        fs::create_dir_all(&config.output_dir).unwrap();

        let saved_path = std::env::var("PATH").unwrap_or_default();
        std::env::set_var(
            "PATH",
            format!("{}:{}", stub_bin.display(), saved_path),
        );

        Self {
            _temp_dir: temp_dir,
            calls_log,
            config,
            saved_path,
        }
    }

    /// Lines logged by stub commands so far.
    pub fn calls(&self) -> Vec<String> {
        match fs::read_to_string(&self.calls_log) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(_) => vec![],
        }
    }

    /// Number of logged invocations of one stubbed tool.
    pub fn call_count(&self, tool: &str) -> usize {
        self.calls()
            .iter()
            .filter(|line| line.split_whitespace().next() == Some(tool))
            .count()
    }

    /// Clear the call log (e.g. between two builds).
    pub fn reset_calls(&self) {
        let _ = fs::remove_file(&self.calls_log);
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        std::env::set_var("PATH", &self.saved_path);
        std::env::remove_var("STUB_FAIL_DEBOOTSTRAP");
        std::env::remove_var("STUB_FAIL_CHROOT_ON");
    }
}

fn write_stub(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Install stub implementations of every external tool the pipeline runs.
fn write_stubs(stub_bin: &Path, calls_log: &Path) {
    let log = calls_log.display();

    // debootstrap <--variant=minbase> <release> <target>: create the target
    // directory like the real tool, or fail when the test asks for it.
    write_stub(
        stub_bin,
        "debootstrap",
        &format!(
            "#!/bin/sh\n\
             echo \"debootstrap $@\" >> {log}\n\
             [ -n \"$STUB_FAIL_DEBOOTSTRAP\" ] && exit 1\n\
             for last; do :; done\n\
             mkdir -p \"$last/etc\" \"$last/boot\" \"$last/usr/share/doc\" \"$last/var\"\n\
             echo stub > \"$last/etc/debian_version\"\n\
             exit 0\n"
        ),
    );

    // chroot <rootfs> /bin/sh -c <script>: emulate apt-get install dropping
    // kernel images into /boot. STUB_FAIL_CHROOT_ON fails scripts matching
    // a substring.
    write_stub(
        stub_bin,
        "chroot",
        &format!(
            "#!/bin/sh\n\
             echo \"chroot $@\" >> {log}\n\
             rootfs=\"$1\"\n\
             if [ -n \"$STUB_FAIL_CHROOT_ON\" ]; then\n\
             \x20   case \"$*\" in *\"$STUB_FAIL_CHROOT_ON\"*) exit 1;; esac\n\
             fi\n\
             case \"$*\" in\n\
             \x20   *\"apt-get install\"*)\n\
             \x20       mkdir -p \"$rootfs/boot\"\n\
             \x20       echo kernel > \"$rootfs/boot/vmlinuz-6.1.0-18-amd64\"\n\
             \x20       echo initrd > \"$rootfs/boot/initrd.img-6.1.0-18-amd64\"\n\
             \x20       ;;\n\
             esac\n\
             exit 0\n"
        ),
    );

    for tool in ["mount", "umount", "mkfs.fat"] {
        write_stub(
            stub_bin,
            tool,
            &format!("#!/bin/sh\necho \"{tool} $@\" >> {log}\nexit 0\n"),
        );
    }

    // mksquashfs <source> <dest> ...: create the image file.
    write_stub(
        stub_bin,
        "mksquashfs",
        &format!(
            "#!/bin/sh\n\
             echo \"mksquashfs $@\" >> {log}\n\
             echo squashfs > \"$2\"\n\
             exit 0\n"
        ),
    );

    // dd of=<file> ...: create the output file.
    write_stub(
        stub_bin,
        "dd",
        &format!(
            "#!/bin/sh\n\
             echo \"dd $@\" >> {log}\n\
             for arg; do\n\
             \x20   case \"$arg\" in of=*) echo img > \"${{arg#of=}}\";; esac\n\
             done\n\
             exit 0\n"
        ),
    );

    // xorriso ... -o <iso> ...: create the ISO file.
    write_stub(
        stub_bin,
        "xorriso",
        &format!(
            "#!/bin/sh\n\
             echo \"xorriso $@\" >> {log}\n\
             grab=\n\
             for arg; do\n\
             \x20   if [ -n \"$grab\" ]; then echo iso > \"$arg\"; grab=; fi\n\
             \x20   [ \"$arg\" = \"-o\" ] && grab=1\n\
             done\n\
             exit 0\n"
        ),
    );
}

/// Resolver stub: resolves every component to the requested version and
/// "fetches" by writing a marker binary.
pub struct StubResolver {
    /// Components that should report no matching release.
    pub missing: Vec<String>,
}

impl StubResolver {
    pub fn new() -> Self {
        Self { missing: vec![] }
    }

    pub fn missing(components: &[&str]) -> Self {
        Self {
            missing: components.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Resolver for StubResolver {
    fn resolve(&self, component: &str, requested: &str) -> Result<String, ResolveError> {
        if self.missing.iter().any(|m| m == component) {
            return Err(ResolveError::NoMatch {
                component: component.to_string(),
                requested: requested.to_string(),
            });
        }
        Ok(requested.to_string())
    }

    fn fetch(&self, component: &str, tag: &str, dest: &Path) -> Result<(), ResolveError> {
        fs::write(dest, format!("#!/bin/sh\n# {} {}\n", component, tag)).map_err(|e| {
            ResolveError::Network {
                component: component.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(())
    }
}
