use super::*;
use crate::downloader::test_helpers::*;

mod maintenance;
mod queue;
