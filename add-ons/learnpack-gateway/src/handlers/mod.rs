pub(crate) mod proxy;
pub(crate) mod trace;
pub(crate) mod worker;
