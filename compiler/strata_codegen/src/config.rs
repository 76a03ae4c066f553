//! Compilation options.

use std::fmt;

/// Target architecture of a compiled kernel.
///
/// CPU targets run parallel tasks on a worker pool; `Cuda` runs them as an
/// SPMD grid of lanes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Arch {
    #[default]
    X64,
    Arm64,
    Cuda,
}

impl Arch {
    pub const fn is_gpu(self) -> bool {
        matches!(self, Arch::Cuda)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Arm64 => "arm64",
            Arch::Cuda => "cuda",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug)]
pub struct CompileConfig {
    pub arch: Arch,
    /// Worker threads for CPU parallel tasks; zero uses the runtime default.
    pub num_cpu_threads: u32,
    pub default_cpu_block_dim: u32,
    pub default_gpu_block_dim: u32,
    /// Blocks per grid launch on GPU targets.
    pub gpu_grid_dim: u32,
    /// Longest index range of one active-list element; must match the
    /// runtime's setting for work splits to line up.
    pub listgen_max_element_size: u32,
    /// Print the module text to stderr before linking.
    pub print_kernel_ir: bool,
}

impl Default for CompileConfig {
    fn default() -> Self {
        CompileConfig {
            arch: Arch::X64,
            num_cpu_threads: 0,
            default_cpu_block_dim: 32,
            default_gpu_block_dim: 32,
            gpu_grid_dim: 4,
            listgen_max_element_size: 1024,
            print_kernel_ir: false,
        }
    }
}

impl CompileConfig {
    /// Defaults overlaid with `STRATA_NUM_THREADS` and `STRATA_DEBUG_IR`.
    pub fn from_env() -> Self {
        let mut config = CompileConfig::default();
        if let Ok(raw) = std::env::var("STRATA_NUM_THREADS") {
            match raw.trim().parse::<u32>() {
                Ok(n) => config.num_cpu_threads = n,
                Err(e) => tracing::warn!(value = %raw, "ignoring STRATA_NUM_THREADS: {e}"),
            }
        }
        if std::env::var("STRATA_DEBUG_IR").is_ok_and(|v| !v.is_empty()) {
            config.print_kernel_ir = true;
        }
        config
    }

    #[must_use]
    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }

    #[must_use]
    pub fn with_num_cpu_threads(mut self, n: u32) -> Self {
        self.num_cpu_threads = n;
        self
    }

    #[must_use]
    pub fn with_default_cpu_block_dim(mut self, n: u32) -> Self {
        self.default_cpu_block_dim = n.max(1);
        self
    }

    #[must_use]
    pub fn with_default_gpu_block_dim(mut self, n: u32) -> Self {
        self.default_gpu_block_dim = n.max(1);
        self
    }

    #[must_use]
    pub fn with_gpu_grid_dim(mut self, n: u32) -> Self {
        self.gpu_grid_dim = n.max(1);
        self
    }

    #[must_use]
    pub fn with_listgen_max_element_size(mut self, n: u32) -> Self {
        self.listgen_max_element_size = n.max(1);
        self
    }

    #[must_use]
    pub fn with_print_kernel_ir(mut self, on: bool) -> Self {
        self.print_kernel_ir = on;
        self
    }

    /// Block dimension of a task that requested `requested` (zero = default).
    pub(crate) fn block_dim(&self, requested: u32) -> u32 {
        if requested != 0 {
            requested
        } else if self.arch.is_gpu() {
            self.default_gpu_block_dim
        } else {
            self.default_cpu_block_dim
        }
    }
}
