use std::fmt;
use std::sync::Arc;
use vise::EncodeLabelValue;

/// How a stage reacts to an error raised while processing an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
pub enum Directive {
    /// Drop the failing element and keep going.
    Resume,
    /// Drop the failing element, reset the stage's state and keep going.
    Restart,
    /// Terminate the stage and propagate the failure downstream.
    Stop,
}

type DeciderFn = dyn Fn(&anyhow::Error) -> Directive + Send + Sync;

#[derive(Clone)]
enum DeciderKind {
    Stopping,
    Resuming,
    Restarting,
    Custom {
        name: &'static str,
        decide: Arc<DeciderFn>,
    },
}

/// Pure function mapping a stage-local failure to a [`Directive`].
///
/// Built-in deciders compare equal by kind, custom ones by identity of the wrapped closure.
#[derive(Clone)]
pub struct SupervisionDecider(DeciderKind);

impl SupervisionDecider {
    /// Stops on every error.
    pub const fn stopping() -> Self {
        Self(DeciderKind::Stopping)
    }

    /// Resumes on every error.
    pub const fn resuming() -> Self {
        Self(DeciderKind::Resuming)
    }

    /// Restarts on every error.
    pub const fn restarting() -> Self {
        Self(DeciderKind::Restarting)
    }

    pub fn custom<F>(name: &'static str, decide: F) -> Self
    where
        F: Fn(&anyhow::Error) -> Directive + Send + Sync + 'static,
    {
        Self(DeciderKind::Custom {
            name,
            decide: Arc::new(decide),
        })
    }

    pub fn decide(&self, error: &anyhow::Error) -> Directive {
        match &self.0 {
            DeciderKind::Stopping => Directive::Stop,
            DeciderKind::Resuming => Directive::Resume,
            DeciderKind::Restarting => Directive::Restart,
            DeciderKind::Custom { decide, .. } => (decide.as_ref())(error),
        }
    }

    pub fn name(&self) -> &'static str {
        match &self.0 {
            DeciderKind::Stopping => "stopping",
            DeciderKind::Resuming => "resuming",
            DeciderKind::Restarting => "restarting",
            DeciderKind::Custom { name, .. } => *name,
        }
    }
}

impl Default for SupervisionDecider {
    fn default() -> Self {
        Self::stopping()
    }
}

impl PartialEq for SupervisionDecider {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (DeciderKind::Stopping, DeciderKind::Stopping)
            | (DeciderKind::Resuming, DeciderKind::Resuming)
            | (DeciderKind::Restarting, DeciderKind::Restarting) => true,
            (DeciderKind::Custom { decide: a, .. }, DeciderKind::Custom { decide: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for SupervisionDecider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SupervisionDecider").field(&self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("transient")]
    struct Transient;

    #[test]
    fn builtin_deciders() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(SupervisionDecider::stopping().decide(&err), Directive::Stop);
        assert_eq!(SupervisionDecider::resuming().decide(&err), Directive::Resume);
        assert_eq!(SupervisionDecider::restarting().decide(&err), Directive::Restart);
        assert_eq!(SupervisionDecider::default(), SupervisionDecider::stopping());
        assert_ne!(SupervisionDecider::resuming(), SupervisionDecider::stopping());
    }

    #[test]
    fn custom_decider_inspects_error() {
        let decider = SupervisionDecider::custom("resume-transient", |err| {
            if err.is::<Transient>() {
                Directive::Resume
            } else {
                Directive::Stop
            }
        });
        assert_eq!(decider.decide(&anyhow::Error::new(Transient)), Directive::Resume);
        assert_eq!(decider.decide(&anyhow::anyhow!("fatal")), Directive::Stop);

        // identity-based equality
        assert_eq!(decider, decider.clone());
        let lookalike = SupervisionDecider::custom("resume-transient", |_| Directive::Resume);
        assert_ne!(decider, lookalike);
        assert_eq!(format!("{decider:?}"), "SupervisionDecider(\"resume-transient\")");
    }
}
