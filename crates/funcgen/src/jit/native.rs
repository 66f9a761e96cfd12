use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use smol_str::SmolStr;

use super::codegen::{self, BinaryTemplate, CSource, Templates, UnaryTemplate};
use super::{Escalator, JitOptions, JitRequest, NativeEntry};
use crate::Shared;
use crate::error::JitError;

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(0);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

type EntryFn = unsafe extern "C" fn(*const f64) -> f64;

/// Escalator that compiles closure bodies with the system C compiler and loads them as
/// shared libraries.
#[derive(Debug, Clone)]
pub struct NativeJit {
    compiler: String,
    timeout: Duration,
    opt_level: u8,
    templates: Templates,
}

impl Default for NativeJit {
    fn default() -> Self {
        Self::new(&JitOptions::default())
    }
}

impl NativeJit {
    pub fn new(options: &JitOptions) -> Self {
        Self {
            compiler: options.compiler.clone().unwrap_or_else(Self::detect_compiler),
            timeout: options.compiler_timeout,
            opt_level: options.opt_level.min(3),
            templates: Templates::default(),
        }
    }

    fn detect_compiler() -> String {
        if let Ok(cc) = std::env::var("CC")
            && !cc.trim().is_empty()
        {
            return cc;
        }
        for compiler in &["cc", "gcc", "clang"] {
            if Command::new(compiler)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok()
            {
                return compiler.to_string();
            }
        }
        "cc".to_string()
    }

    /// Returns `true` if the configured compiler can be run.
    pub fn is_available(&self) -> bool {
        Command::new(&self.compiler)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    pub fn compiler(&self) -> &str {
        &self.compiler
    }

    /// Registers how the binary operator `symbol` is written in C.
    pub fn add_binary_template(&mut self, symbol: &str, template: BinaryTemplate) -> &mut Self {
        self.templates.binary.insert(SmolStr::new(symbol), template);
        self
    }

    pub fn add_unary_template(&mut self, symbol: &str, template: UnaryTemplate) -> &mut Self {
        self.templates.unary.insert(SmolStr::new(symbol), template);
        self
    }

    /// Emits the C source for a request without compiling it.
    pub fn source<V>(&self, request: &JitRequest<'_, V>) -> Result<CSource, JitError> {
        let symbol = format!("fg_jit_{}", NEXT_SYMBOL.fetch_add(1, Ordering::Relaxed));
        codegen::emit(request, &self.templates, &symbol)
    }

    fn compile(&self, source: &Path, artifact: &Path, log: &Path, cancel: &AtomicBool) -> Result<(), JitError> {
        let stderr = File::create(log)?;
        let child = Command::new(&self.compiler)
            .arg("-shared")
            .arg("-fPIC")
            .arg(format!("-O{}", self.opt_level))
            .arg("-o")
            .arg(artifact)
            .arg(source)
            .arg("-lm")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => JitError::CompilerNotFound,
                _ => JitError::from(e),
            })?;

        let mut child = scopeguard::guard(child, |mut child| {
            let _ = child.kill();
            let _ = child.wait();
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if cancel.load(Ordering::Acquire) {
                return Err(JitError::Cancelled);
            }
            if started.elapsed() >= self.timeout {
                tracing::warn!(compiler = %self.compiler, timeout = ?self.timeout, "native compiler timed out");
                return Err(JitError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        if status.success() {
            Ok(())
        } else {
            Err(JitError::Compiler {
                status: status.to_string(),
                stderr: fs::read_to_string(log).unwrap_or_default().trim().to_string(),
            })
        }
    }

    #[cfg(unix)]
    fn load(&self, artifact: &Path, symbol: &str) -> Result<NativeEntry, JitError> {
        // SAFETY: the library was just built from generated code that has no initializers.
        let library = unsafe { libloading::Library::new(artifact) }.map_err(|e| JitError::Load(e.to_string()))?;
        // SAFETY: the generated entry point has exactly this signature.
        let entry: EntryFn = unsafe {
            *library
                .get::<EntryFn>(symbol.as_bytes())
                .map_err(|_| JitError::Symbol(symbol.to_string()))?
        };

        Ok(Shared::new(move |args: &[f64]| {
            let _library = &library;
            // SAFETY: callers pass one argument per closure parameter, which is all the
            // entry point reads.
            unsafe { entry(args.as_ptr()) }
        }))
    }

    #[cfg(not(unix))]
    fn load(&self, _: &Path, _: &str) -> Result<NativeEntry, JitError> {
        Err(JitError::UnsupportedPlatform)
    }
}

impl<V> Escalator<V> for NativeJit {
    fn escalate(&self, request: &JitRequest<'_, V>, cancel: &AtomicBool) -> Result<NativeEntry, JitError> {
        if cfg!(not(unix)) {
            return Err(JitError::UnsupportedPlatform);
        }

        // Unsupported bodies fail before any file or process is touched.
        let source = self.source(request)?;

        let dir = tempfile::Builder::new().prefix("funcgen-jit").tempdir()?;
        let source_path = dir.path().join(format!("{}.c", source.symbol));
        let artifact_path: PathBuf = dir.path().join(format!("lib{}.so", source.symbol));
        let log_path = dir.path().join(format!("{}.log", source.symbol));
        fs::write(&source_path, &source.code)?;

        tracing::debug!(
            id = request.id,
            symbol = %source.symbol,
            compiler = %self.compiler,
            "invoking native compiler"
        );
        self.compile(&source_path, &artifact_path, &log_path, cancel)?;

        if cancel.load(Ordering::Acquire) {
            return Err(JitError::Cancelled);
        }
        self.load(&artifact_path, &source.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build;
    use crate::ast::node::IdentName;
    use crate::jit::JitMarshal;

    struct F64Marshal;

    impl JitMarshal<f64> for F64Marshal {
        fn to_native(&self, value: &f64) -> Option<f64> {
            Some(*value)
        }

        fn from_native(&self, value: f64) -> f64 {
            value
        }
    }

    fn native_jit() -> Option<NativeJit> {
        let jit = NativeJit::default();
        jit.is_available().then_some(jit)
    }

    #[test]
    fn test_escalate_increment() {
        let Some(jit) = native_jit() else {
            return;
        };
        let params = [IdentName::new("x")];
        let body = build::operate("+", build::ident("x"), build::constant(1.0));
        let request = JitRequest {
            id: 1,
            params: &params,
            body: &body,
            marshal: &F64Marshal,
        };

        let entry = jit.escalate(&request, &AtomicBool::new(false)).unwrap();
        assert_eq!(entry(&[4.0]), 5.0);
    }

    #[test]
    fn test_escalate_cancelled_before_load() {
        let Some(jit) = native_jit() else {
            return;
        };
        let params = [IdentName::new("x")];
        let body = build::operate("*", build::ident("x"), build::ident("x"));
        let request = JitRequest {
            id: 2,
            params: &params,
            body: &body,
            marshal: &F64Marshal,
        };

        assert!(matches!(
            jit.escalate(&request, &AtomicBool::new(true)),
            Err(JitError::Cancelled)
        ));
    }

    #[test]
    fn test_escalate_missing_compiler() {
        let jit = NativeJit::new(&JitOptions {
            compiler: Some("funcgen-no-such-compiler".to_string()),
            ..JitOptions::default()
        });
        let params = [IdentName::new("x")];
        let body = build::ident("x");
        let request = JitRequest {
            id: 3,
            params: &params,
            body: &body,
            marshal: &F64Marshal,
        };

        assert!(!jit.is_available());
        assert_eq!(
            jit.escalate(&request, &AtomicBool::new(false)).err(),
            Some(JitError::CompilerNotFound)
        );
    }

    #[test]
    fn test_unsupported_body_does_not_invoke_compiler() {
        let jit = NativeJit::new(&JitOptions {
            compiler: Some("funcgen-no-such-compiler".to_string()),
            ..JitOptions::default()
        });
        let params = [IdentName::new("x")];
        let body = build::method_call(build::ident("x"), "size", vec![]);
        let request = JitRequest {
            id: 4,
            params: &params,
            body: &body,
            marshal: &F64Marshal,
        };

        assert!(matches!(
            jit.escalate(&request, &AtomicBool::new(false)),
            Err(JitError::Unsupported { .. })
        ));
    }
}
