//! Platform query shims.
//!
//! Read-only build/configuration queries exposed to library and generated
//! code, compiled down to constants; the only mutable state behind this
//! surface is the pair of leak-checker toggles on the process context.

use sable_memory::MemoryModel;

use crate::lifecycle::process_env;

/// Operating-system family, numbered stably for the managed-side ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OsFamily {
    /// Unrecognized target.
    Unknown = 0,
    /// macOS.
    MacOs = 1,
    /// iOS.
    Ios = 2,
    /// Linux.
    Linux = 3,
    /// Windows.
    Windows = 4,
    /// Android.
    Android = 5,
    /// WebAssembly host.
    Wasm = 6,
    /// tvOS.
    TvOs = 7,
    /// watchOS.
    WatchOs = 8,
}

/// CPU architecture, numbered stably for the managed-side ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CpuArchitecture {
    /// Unrecognized target.
    Unknown = 0,
    /// 32-bit ARM.
    Arm32 = 1,
    /// AArch64.
    Arm64 = 2,
    /// 32-bit x86.
    X86 = 3,
    /// x86-64.
    X64 = 4,
    /// MIPS (big-endian).
    Mips32 = 5,
    /// MIPS (little-endian).
    Mipsel32 = 6,
    /// wasm32.
    Wasm32 = 7,
}

/// The OS family this binary was built for.
pub fn os_family() -> OsFamily {
    if cfg!(target_os = "macos") {
        OsFamily::MacOs
    } else if cfg!(target_os = "ios") {
        OsFamily::Ios
    } else if cfg!(target_os = "linux") {
        OsFamily::Linux
    } else if cfg!(target_os = "windows") {
        OsFamily::Windows
    } else if cfg!(target_os = "android") {
        OsFamily::Android
    } else if cfg!(target_family = "wasm") {
        OsFamily::Wasm
    } else if cfg!(target_os = "tvos") {
        OsFamily::TvOs
    } else if cfg!(target_os = "watchos") {
        OsFamily::WatchOs
    } else {
        OsFamily::Unknown
    }
}

/// The CPU architecture this binary was built for.
pub fn cpu_architecture() -> CpuArchitecture {
    if cfg!(target_arch = "arm") {
        CpuArchitecture::Arm32
    } else if cfg!(target_arch = "aarch64") {
        CpuArchitecture::Arm64
    } else if cfg!(target_arch = "x86") {
        CpuArchitecture::X86
    } else if cfg!(target_arch = "x86_64") {
        CpuArchitecture::X64
    } else if cfg!(all(target_arch = "mips", target_endian = "big")) {
        CpuArchitecture::Mips32
    } else if cfg!(target_arch = "mips") {
        CpuArchitecture::Mipsel32
    } else if cfg!(target_arch = "wasm32") {
        CpuArchitecture::Wasm32
    } else {
        CpuArchitecture::Unknown
    }
}

/// Whether unaligned loads and stores are safe on this target.
pub fn can_access_unaligned() -> bool {
    !matches!(
        cpu_architecture(),
        CpuArchitecture::Arm32 | CpuArchitecture::Mips32 | CpuArchitecture::Mipsel32
    )
}

/// Whether this target is little-endian.
pub fn is_little_endian() -> bool {
    cfg!(target_endian = "little")
}

/// Whether this is a debug build of the runtime.
pub fn is_debug_binary() -> bool {
    cfg!(debug_assertions)
}

/// The reference-counting policy compiled into this build.
pub fn memory_model() -> MemoryModel {
    sable_memory::active_memory_model()
}

/// Whether the object leak checker is enabled (process-wide).
pub fn memory_leak_checker_enabled() -> bool {
    process_env().memory_leak_checker_enabled()
}

/// Toggle the object leak checker (process-wide).
pub fn set_memory_leak_checker(value: bool) {
    process_env().set_memory_leak_checker(value);
}

/// Whether the cleaners leak checker is enabled (process-wide).
pub fn cleaners_leak_checker_enabled() -> bool {
    process_env().cleaners_leak_checker_enabled()
}

/// Toggle the cleaners leak checker (process-wide).
pub fn set_cleaners_leak_checker(value: bool) {
    process_env().set_cleaners_leak_checker(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_are_consistent_with_the_build() {
        // Endianness and the memory model are compile-time facts; just pin
        // them against their cfg sources.
        assert_eq!(is_little_endian(), cfg!(target_endian = "little"));
        assert_eq!(is_debug_binary(), cfg!(debug_assertions));
        assert_eq!(
            memory_model() == MemoryModel::Strict,
            sable_memory::IS_STRICT_MEMORY_MODEL
        );
    }

    #[test]
    fn unaligned_access_matches_architecture() {
        let arch = cpu_architecture();
        let expected = !matches!(
            arch,
            CpuArchitecture::Arm32 | CpuArchitecture::Mips32 | CpuArchitecture::Mipsel32
        );
        assert_eq!(can_access_unaligned(), expected);
    }
}
