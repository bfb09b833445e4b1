use std::fmt;

use thiserror::Error;

use crate::environment::Environment;

/// A capability together with the providers that may expose it.
#[derive(Debug, Clone, Copy)]
pub struct Requirement<'a> {
    pub capability: &'a str,
    /// Most preferred provider first.
    pub candidates: &'a [&'a str],
    /// Appended to the error when every candidate fails.
    pub remediation: &'a str,
}

/// One activation attempt and the loader status it returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub provider: String,
    pub status: i32,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status={})", self.provider, self.status)
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(
        "Could not load a provider for {capability}. Tried: {}.\n{remediation}",
        join_attempts(attempts)
    )]
    DependencyUnavailable {
        capability: String,
        attempts: Vec<Attempt>,
        remediation: String,
    },
}

fn join_attempts(attempts: &[Attempt]) -> String {
    if attempts.is_empty() {
        return "nothing".to_string();
    }
    attempts
        .iter()
        .map(Attempt::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runs `attempt` on each candidate in order until `accept` holds.
///
/// Returns the accepted candidate, or every candidate paired with its
/// attempt result when none was accepted. `ctx` is threaded through both
/// closures so they can share mutable state without aliasing.
pub fn try_in_order<'c, Ctx, C, S>(
    ctx: &mut Ctx,
    candidates: &'c [C],
    mut attempt: impl FnMut(&mut Ctx, &C) -> S,
    mut accept: impl FnMut(&Ctx, &C, &S) -> bool,
) -> Result<&'c C, Vec<(&'c C, S)>>
where
    Ctx: ?Sized,
{
    let mut log = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let outcome = attempt(&mut *ctx, candidate);
        if accept(&*ctx, candidate, &outcome) {
            return Ok(candidate);
        }
        log.push((candidate, outcome));
    }
    Err(log)
}

/// Makes sure `requirement.capability` is exposed by `env`.
///
/// Returns `Ok(None)` when nothing had to be loaded and `Ok(Some(provider))`
/// naming the candidate that activated the capability. A candidate counts
/// only when its load status is non-negative and the capability is visible
/// afterwards. Failed loads are not undone.
pub fn ensure_capability<E>(
    env: &mut E,
    requirement: &Requirement<'_>,
) -> Result<Option<String>, ProbeError>
where
    E: Environment + ?Sized,
{
    let capability = requirement.capability;
    if env.has_capability(capability) {
        tracing::debug!(capability, "capability already available");
        return Ok(None);
    }

    let result = try_in_order(
        env,
        requirement.candidates,
        |env, provider| {
            let status = env.load(provider);
            tracing::debug!(capability, provider, status, "attempted provider load");
            status
        },
        |env, _, status| *status >= 0 && env.has_capability(capability),
    );

    match result {
        Ok(provider) => {
            tracing::info!(capability, provider, "capability activated");
            Ok(Some((*provider).to_string()))
        }
        Err(log) => {
            let attempts: Vec<Attempt> = log
                .into_iter()
                .map(|(provider, status)| Attempt {
                    provider: (*provider).to_string(),
                    status,
                })
                .collect();
            tracing::warn!(capability, tried = attempts.len(), "no provider exposed capability");
            Err(ProbeError::DependencyUnavailable {
                capability: capability.to_string(),
                attempts,
                remediation: requirement.remediation.to_string(),
            })
        }
    }
}
