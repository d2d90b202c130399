//! Educational features: what each command does and which tools it runs.

use colored::Colorize;

/// Command explanation builder.
pub struct Explain {
    description: String,
    tools: Vec<&'static str>,
    privileged: Option<&'static str>,
    what_happens: Vec<String>,
}

impl Explain {
    fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            tools: Vec::new(),
            privileged: None,
            what_happens: Vec::new(),
        }
    }

    fn tools(mut self, tools: &[&'static str]) -> Self {
        self.tools.extend_from_slice(tools);
        self
    }

    fn privileged(mut self, note: &'static str) -> Self {
        self.privileged = Some(note);
        self
    }

    fn step(mut self, step: &str) -> Self {
        self.what_happens.push(step.to_string());
        self
    }

    /// Print the explanation to stdout.
    pub fn print(&self) {
        println!();
        println!("{}", "=== What This Does ===".bold().cyan());
        println!("{}", self.description);
        println!();

        if !self.what_happens.is_empty() {
            println!("{}", "How it works:".bold());
            for (i, step) in self.what_happens.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
            println!();
        }

        if !self.tools.is_empty() {
            println!("{} {}", "Tools:".bold(), self.tools.join(", ").dimmed());
        }

        if let Some(note) = self.privileged {
            println!("{} {}", "Needs root:".bold(), note);
        }

        println!();
        println!("{}", "=== Results ===".bold().cyan());
        println!();
    }

    // ========================================================================
    // Factory methods for each command
    // ========================================================================

    pub fn status() -> Self {
        Self::new("Reports whether the firmware is UEFI, whether Secure Boot is enforcing, and which tools are installed.")
            .tools(&["mokutil", "bootctl"])
            .step("Checks for the UEFI firmware directory; legacy BIOS stops here")
            .step("Reads the Secure Boot flag with mokutil, then the raw efivar, then bootctl")
            .step("Reads the SetupMode efivar")
            .step("Looks up every external tool the signing chain needs")
    }

    pub fn diagnose() -> Self {
        Self::new("Explains why a custom kernel might fail to boot under Secure Boot, and what to do about it.")
            .tools(&["mokutil", "modinfo", "sbverify", "unmkinitramfs", "lsinitrd"])
            .privileged("listing MOK keys (one authentication)")
            .step("Stops at the first platform problem: not UEFI, undetectable, Secure Boot off")
            .step("Checks that one of your signing identities is enrolled or queued for enrollment")
            .step("Samples modules of every custom kernel and of its initrd for signatures")
            .step("Verifies each boot image against your certificate")
    }

    pub fn kernels() -> Self {
        Self::new("Lists installed kernels that were not installed by a stock distribution package.")
            .tools(&["dpkg-query", "rpm", "pacman"])
            .step("Enumerates the module root")
            .step("Asks the package database who owns each kernel's module tree")
            .step("Unowned trees, or trees owned by a non-stock maintainer, are custom")
    }

    pub fn keys_generate() -> Self {
        Self::new("Creates a self-signed RSA code-signing identity: private key, DER and PEM certificates.")
            .tools(&["openssl"])
            .step("Generates a 2048-bit RSA key and a self-signed certificate")
            .step("Writes the DER form (module signing, MOK import) and the PEM form (boot image signing)")
            .step("Restricts the private key to the current user")
    }

    pub fn keys() -> Self {
        Self::new("Shows the signing identities stored in the state directory.")
    }

    pub fn mok_list() -> Self {
        Self::new("Lists keys in the Machine Owner Key list and keys queued for enrollment.")
            .tools(&["mokutil"])
            .privileged("mokutil --list-enrolled / --list-new")
    }

    pub fn mok_change() -> Self {
        Self::new("Queues a change to the Machine Owner Key list for the next boot.")
            .tools(&["mokutil"])
            .privileged("mokutil --import / --delete / --reset")
            .step("Queues the request with a one-time password (or the root password)")
            .step("At the next boot, the blue MOK manager screen asks to confirm the change")
            .step("Re-type the same password there; the change is then applied by the firmware")
    }

    pub fn sign() -> Self {
        Self::new("Signs every module of a kernel, and its boot image, with your signing identity.")
            .tools(&["sign-file", "sbsign", "xz", "gzip", "zstd", "update-initramfs", "dracut", "mkinitcpio"])
            .privileged("one authentication for the whole batch")
            .step("Checks the identity and every required tool before touching any file")
            .step("Decompresses each compressed module, signs it, and recompresses it in place")
            .step("Signs the boot image (x86 only), keeping the unsigned original as a backup")
            .step("Rebuilds the initrd so it carries the signed modules")
            .step("Ctrl-C stops after the module being signed")
            .step("With --module, signs just that file and leaves the initrd alone")
    }

    pub fn verify() -> Self {
        Self::new("Estimates whether a kernel is signed by sampling its modules and its initrd.")
            .tools(&["modinfo", "sbverify", "unmkinitramfs", "lsinitrd"])
            .step("Picks a random sample of modules and reads their signer")
            .step("Unpacks the initrd to a scratch directory and samples it too")
            .step("Verifies the boot image against your certificate")
            .step("With --module, checks one file and shows its signer and key id")
    }

    pub fn history() -> Self {
        Self::new("Shows the audit trail of key generation, MOK changes and signing batches.")
    }

    pub fn deps() -> Self {
        Self::new("Checks which of the external tools the signing chain uses are installed.")
    }
}
