pub(crate) mod delivery;
pub(crate) mod scheduler;
pub(crate) mod sweep;
