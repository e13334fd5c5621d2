//! Environment step.
use super::Env;

/// Additional information to `Obs` and `Act`.
pub trait Info {}

impl Info for () {}

/// Represents an action, observation and reward tuple `(a_t, o_t+1, r_t)`
/// with some additional information.
pub struct Step<E: Env> {
    /// Action.
    pub act: E::Act,

    /// Observation after the action.
    pub obs: E::Obs,

    /// Reward.
    pub reward: f32,

    /// Flag denoting if episode is terminated.
    pub is_terminated: bool,

    /// Flag denoting if episode is truncated.
    pub is_truncated: bool,

    /// Information defined by user.
    pub info: E::Info,
}

impl<E: Env> Step<E> {
    /// Constructs a [`Step`] object.
    pub fn new(
        obs: E::Obs,
        act: E::Act,
        reward: f32,
        is_terminated: bool,
        is_truncated: bool,
        info: E::Info,
    ) -> Self {
        Step {
            act,
            obs,
            reward,
            is_terminated,
            is_truncated,
            info,
        }
    }

    #[inline]
    /// Terminated or truncated.
    pub fn is_done(&self) -> bool {
        self.is_terminated || self.is_truncated
    }
}

/// A transition `(o_t, a_t, o_t+1, r_t, terminated_t)` pushed into a replay buffer.
///
/// Truncation is not stored: a truncated episode still bootstraps from `o_t+1`.
#[derive(Clone, Debug)]
pub struct Transition<O, A> {
    /// Observation before the action.
    pub obs: O,

    /// Action.
    pub act: A,

    /// Observation after the action.
    pub next_obs: O,

    /// Reward.
    pub reward: f32,

    /// Flag denoting if the episode is terminated at `o_t+1`.
    pub is_terminated: bool,
}

impl<O: Clone, A: Clone> Transition<O, A> {
    /// Builds a transition from the previous observation and a [`Step`].
    pub fn from_step<E>(obs: O, step: &Step<E>) -> Self
    where
        E: Env<Obs = O, Act = A>,
    {
        Self {
            obs,
            act: step.act.clone(),
            next_obs: step.obs.clone(),
            reward: step.reward,
            is_terminated: step.is_terminated,
        }
    }
}
