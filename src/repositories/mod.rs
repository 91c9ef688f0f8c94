pub(crate) mod answers;
pub(crate) mod definitions;
pub(crate) mod events;
#[cfg(test)]
pub(crate) mod memory;
pub(crate) mod pg_store;
pub(crate) mod sessions;
pub(crate) mod store;
