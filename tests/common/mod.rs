pub(crate) mod fixtures;

pub(crate) mod logging;

pub(crate) mod mock_chain;

pub(crate) mod mock_management;

pub(crate) mod mock_status;
