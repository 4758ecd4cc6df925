pub(crate) mod cursor;
pub(crate) mod meta;
pub(crate) mod migrate;
pub(crate) mod sync;
