pub(crate) mod answer_store;
pub(crate) mod catalog;
pub(crate) mod definition;
pub(crate) mod engine;
pub(crate) mod event_delivery;
pub(crate) mod grading;
pub(crate) mod scoring;
pub(crate) mod session_clock;
pub(crate) mod session_controller;
pub(crate) mod storage;
pub(crate) mod submission_finalize;
