use crate::launch::LaunchContext;

/// The host runtime's own end of launch.
///
/// `true` lets startup continue, `false` tells the host to treat the launch
/// as rejected.
pub trait Continuation: Send + Sync {
    fn finish_launching(&self, launch: &LaunchContext) -> bool;
}

impl<F> Continuation for F
where
    F: Fn(&LaunchContext) -> bool + Send + Sync,
{
    fn finish_launching(&self, launch: &LaunchContext) -> bool {
        self(launch)
    }
}
