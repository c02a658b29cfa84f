//! # Engine
//!
//! Applies and reverts the configured rewrites. Every target is handled on its own: one that
//! can't be found or can't be patched is logged and reported, and the rest carry on.
//!
//! Apply and revert are idempotent. The state check and transition happen under one lock, but the
//! lock is not held while the host runs, so a host that calls back into the engine (a ready
//! signal firing mid-install, say) sees [`EngineState::Applying`] or [`EngineState::Reverting`]
//! and the nested call does nothing.

use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::code::{decode, encode, DecodeError, FieldId, Instr, MethodId};
use crate::config::{InstrumentationConfig, PatternConfig};
use crate::hook::{HookError, HookHost, RevertToken};
use crate::replace::{BindError, OverrideFn};
use crate::resolve::{resolve_field, FieldInfo, MethodTarget, ResolveError};
use crate::rewrite::{rewrite_all, AccessPattern, PatternError};

/// Whether the engine's rewrites are installed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Nothing installed
    #[default]
    Unpatched,
    /// An apply is running
    Applying,
    /// Apply has run; whatever could be installed is installed
    Patched,
    /// A revert is running
    Reverting,
}

/// Errors while patching one target or preparing one pattern
#[derive(Debug, Error)]
pub enum PatchError {
    /// A configured method or field doesn't exist in this host
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The override table doesn't fit the configured fields
    #[error(transparent)]
    Bind(#[from] BindError),
    /// The override function isn't a drop-in for the field read
    #[error(transparent)]
    Pattern(#[from] PatternError),
    /// The host refused to read, register, or install
    #[error(transparent)]
    Hook(#[from] HookError),
    /// The loaded body isn't a valid instruction stream
    #[error("method body could not be decoded: {0}")]
    Decode(#[from] DecodeError),
    /// The rewritten body would not fit in place
    #[error("rewritten body is {rewritten} bytes, loaded body is {original}")]
    LengthChanged {
        /// Length of the loaded body
        original: usize,
        /// Length of the rewritten body
        rewritten: usize,
    },
    /// The method reads a field whose replacement could not be prepared, so it was left alone
    #[error("reads {0:?}, whose replacement could not be prepared")]
    PatternUnavailable(FieldId),
}

/// What happened to one target during apply
#[derive(Debug)]
pub enum TargetOutcome {
    /// The rewrite is installed
    Patched {
        /// Resolved method
        method: MethodId,
        /// Number of reads redirected
        sites: usize,
    },
    /// The method exists but reads none of the configured fields, so it was left alone
    Unmatched {
        /// Resolved method
        method: MethodId,
    },
    /// The method doesn't exist in this host
    NotFound(ResolveError),
    /// The method exists but patching it failed
    Failed(PatchError),
}

/// Outcome of one target
#[derive(Debug)]
pub struct TargetReport {
    /// The configured target
    pub target: MethodTarget,
    /// What happened to it
    pub outcome: TargetOutcome,
}

/// Per-target outcomes of an apply
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// One entry per configured target, in configuration order
    pub targets: Vec<TargetReport>,
    /// Patterns that could not be prepared, and why
    pub pattern_failures: Vec<PatchError>,
}
impl ApplyReport {
    /// Targets whose rewrite is installed
    pub fn patched(&self) -> impl Iterator<Item = &TargetReport> {
        self.targets
            .iter()
            .filter(|report| matches!(report.outcome, TargetOutcome::Patched { .. }))
    }

    /// Targets missing from the host
    pub fn not_found(&self) -> impl Iterator<Item = &TargetReport> {
        self.targets
            .iter()
            .filter(|report| matches!(report.outcome, TargetOutcome::NotFound(_)))
    }

    /// Targets that exist but failed to patch
    pub fn failed(&self) -> impl Iterator<Item = &TargetReport> {
        self.targets
            .iter()
            .filter(|report| matches!(report.outcome, TargetOutcome::Failed(_)))
    }

    /// Whether every target was patched and every pattern prepared
    pub fn is_complete(&self) -> bool {
        self.pattern_failures.is_empty() && self.patched().count() == self.targets.len()
    }
}

/// Outcome of a revert
#[derive(Debug, Default)]
pub struct RevertReport {
    /// Targets whose original body is back
    pub reverted: Vec<MethodTarget>,
    /// Targets whose restore failed. They stay installed and the next revert retries them.
    pub failed: Vec<(MethodTarget, HookError)>,
}

/// Saved state to undo the rewrite of one target
struct RewriteRecord {
    /// The configured target
    target: MethodTarget,
    /// Method it resolved to
    method: MethodId,
    /// Number of reads redirected
    sites: usize,
    /// Host token that puts the original body back
    token: Box<dyn RevertToken>,
}

/// Result of patching one resolved target
enum TargetPatch {
    /// Rewrite installed
    Installed(RewriteRecord),
    /// Nothing to rewrite
    Unmatched(MethodId),
}

/// Patterns usable in one apply cycle
#[derive(Default)]
struct Patterns {
    /// Prepared patterns
    ready: Vec<AccessPattern>,
    /// Fields that exist but whose pattern failed to prepare
    blocked: Vec<FieldId>,
}

/// Mutable engine state
#[derive(Default)]
struct Inner {
    /// Current state
    state: EngineState,
    /// Installed rewrites, in install order
    records: Vec<RewriteRecord>,
    /// Prepared patterns, one slot per configured pattern, reused across apply cycles. Taken out
    /// while an apply runs.
    patterns: Vec<Option<AccessPattern>>,
}

/// Applies and reverts the rewrites of one [`InstrumentationConfig`] on one host
pub struct Engine<H: HookHost> {
    /// The host being instrumented
    host: Arc<H>,
    /// What to instrument
    config: InstrumentationConfig,
    /// State, records, and prepared patterns
    inner: Mutex<Inner>,
}

impl<H: HookHost> Engine<H> {
    /// Creates an unpatched engine
    pub fn new(host: Arc<H>, config: InstrumentationConfig) -> Self {
        let patterns = vec![None; config.patterns.len()];
        Self {
            host,
            config,
            inner: Mutex::new(Inner {
                patterns,
                ..Inner::default()
            }),
        }
    }

    /// The host being instrumented
    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Current state
    pub fn state(&self) -> EngineState {
        self.inner.lock().state
    }

    /// Installed rewrites as `(method, sites)`, in install order
    pub fn installed(&self) -> Vec<(MethodId, usize)> {
        self.inner
            .lock()
            .records
            .iter()
            .map(|record| (record.method, record.sites))
            .collect()
    }

    /// Original body of every installed rewrite, in install order
    pub fn originals(&self) -> Vec<(MethodId, Vec<u8>)> {
        self.inner
            .lock()
            .records
            .iter()
            .map(|record| (record.method, record.token.original().to_vec()))
            .collect()
    }

    /// Installs every rewrite that can be installed.
    ///
    /// Returns `None` without touching anything unless the engine is unpatched. Otherwise the
    /// engine ends up [`EngineState::Patched`] whatever the individual outcomes; call
    /// [`Engine::revert`] before trying again.
    pub fn apply(&self) -> Option<ApplyReport> {
        let _span = info_span!("instrumentation", id = %self.config.id).entered();
        let mut cache = {
            let mut inner = self.inner.lock();
            if inner.state != EngineState::Unpatched {
                debug!(state = ?inner.state, "apply skipped");
                return None;
            }
            inner.state = EngineState::Applying;
            mem::take(&mut inner.patterns)
        };

        let mut report = ApplyReport::default();
        let patterns = self.prepare_patterns(&mut cache, &mut report.pattern_failures);

        let mut records = Vec::new();
        for target in &self.config.targets {
            let outcome = match self.patch_target(target, &patterns) {
                Ok(TargetPatch::Installed(record)) => {
                    info!("patched {} at {} site(s)", target, record.sites);
                    let outcome = TargetOutcome::Patched {
                        method: record.method,
                        sites: record.sites,
                    };
                    records.push(record);
                    outcome
                }
                Ok(TargetPatch::Unmatched(method)) => {
                    debug!("{} has nothing to rewrite", target);
                    TargetOutcome::Unmatched { method }
                }
                Err(PatchError::Resolve(e)) => {
                    warn!("skipping {}: {}", target, e);
                    TargetOutcome::NotFound(e)
                }
                Err(e) => {
                    warn!("failed to patch {}: {}", target, e);
                    TargetOutcome::Failed(e)
                }
            };
            report.targets.push(TargetReport {
                target: target.clone(),
                outcome,
            });
        }

        {
            let mut inner = self.inner.lock();
            inner.patterns = cache;
            inner.records = records;
            inner.state = EngineState::Patched;
        }

        info!(
            "applied: {} patched, {} not found, {} failed",
            report.patched().count(),
            report.not_found().count(),
            report.failed().count()
        );
        Some(report)
    }

    /// Restores every installed rewrite, newest first.
    ///
    /// Returns `None` without touching anything unless the engine is patched. Rewrites whose
    /// restore fails stay installed and the engine stays [`EngineState::Patched`], so a later
    /// revert retries them.
    pub fn revert(&self) -> Option<RevertReport> {
        let _span = info_span!("instrumentation", id = %self.config.id).entered();
        let records = {
            let mut inner = self.inner.lock();
            if inner.state != EngineState::Patched {
                debug!(state = ?inner.state, "revert skipped");
                return None;
            }
            inner.state = EngineState::Reverting;
            mem::take(&mut inner.records)
        };

        let mut report = RevertReport::default();
        let mut kept = Vec::new();
        for mut record in records.into_iter().rev() {
            match record.token.revert() {
                Ok(()) => {
                    debug!("restored {}", record.target);
                    report.reverted.push(record.target);
                }
                Err(e) => {
                    warn!("failed to restore {}: {}", record.target, e);
                    report.failed.push((record.target.clone(), e));
                    kept.push(record);
                }
            }
        }
        kept.reverse();

        {
            let mut inner = self.inner.lock();
            inner.state = if kept.is_empty() {
                EngineState::Unpatched
            } else {
                EngineState::Patched
            };
            inner.records = kept;
        }

        info!(
            "reverted: {} restored, {} failed",
            report.reverted.len(),
            report.failed.len()
        );
        Some(report)
    }

    /// Prepares every configured pattern not prepared by an earlier cycle
    fn prepare_patterns(
        &self,
        cache: &mut [Option<AccessPattern>],
        failures: &mut Vec<PatchError>,
    ) -> Patterns {
        let mut patterns = Patterns::default();
        for (slot, config) in cache.iter_mut().zip(&self.config.patterns) {
            if let Some(pattern) = slot {
                patterns.ready.push(*pattern);
                continue;
            }
            let field = match resolve_field(&*self.host, &config.owner, &config.field) {
                Ok(field) => field,
                Err(e) => {
                    warn!("can't redirect {}::{}: {}", config.owner, config.field, e);
                    failures.push(e.into());
                    continue;
                }
            };
            match self.prepare_pattern(config, &field) {
                Ok(pattern) => {
                    *slot = Some(pattern);
                    patterns.ready.push(pattern);
                }
                Err(e) => {
                    warn!("can't redirect {}::{}: {}", config.owner, config.field, e);
                    patterns.blocked.push(field.id);
                    failures.push(e);
                }
            }
        }
        patterns
    }

    /// Binds a pattern's table, finds or registers its override function, and checks the result
    fn prepare_pattern(
        &self,
        config: &PatternConfig,
        field: &FieldInfo,
    ) -> Result<AccessPattern, PatchError> {
        let host = &*self.host;
        let identity = resolve_field(host, &config.owner, &config.identity_field)?;
        let function = OverrideFn::bind(Arc::clone(&config.table), field, &identity)?;
        let id = match host.find_function(&config.function) {
            Some(id) => {
                debug!("reusing registered {}", config.function);
                id
            }
            None => host.register_function(
                &config.function,
                function.signature(),
                function.into_native(),
            )?,
        };
        Ok(AccessPattern::new(host, field, id)?)
    }

    /// Resolves, rewrites, and installs one target
    fn patch_target(
        &self,
        target: &MethodTarget,
        patterns: &Patterns,
    ) -> Result<TargetPatch, PatchError> {
        let method = target.resolve(&*self.host)?;
        let code = self.host.read_code(method)?;
        let instrs = decode(&code)?;
        if let Some(&field) = patterns
            .blocked
            .iter()
            .find(|&&field| instrs.contains(&Instr::LdFld(field)))
        {
            return Err(PatchError::PatternUnavailable(field));
        }

        let rewrite = rewrite_all(&instrs, &patterns.ready);
        if rewrite.sites == 0 {
            return Ok(TargetPatch::Unmatched(method));
        }

        let patched = encode(&rewrite.instrs);
        if patched.len() != code.len() {
            return Err(PatchError::LengthChanged {
                original: code.len(),
                rewritten: patched.len(),
            });
        }
        let token = self.host.install(method, &patched)?;
        Ok(TargetPatch::Installed(RewriteRecord {
            target: target.clone(),
            method,
            sites: rewrite.sites,
            token,
        }))
    }
}
