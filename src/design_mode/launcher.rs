use std::sync::Arc;

use testplatform_core::PlatformResult;
use testplatform_core::objectmodel::TestProcessStartInfo;

use super::correlator::HostLaunchCorrelator;
use crate::hosting::TestHostLauncher;

/// Launches test hosts by asking the design-mode client to do it.
pub struct DesignModeTestHostLauncher {
    correlator: Arc<HostLaunchCorrelator>,
    debug: bool,
}

impl DesignModeTestHostLauncher {
    pub fn new(correlator: Arc<HostLaunchCorrelator>, debug: bool) -> Self {
        Self { correlator, debug }
    }
}

impl TestHostLauncher for DesignModeTestHostLauncher {
    fn is_debug(&self) -> bool {
        self.debug
    }

    fn launch_test_host(&self, start_info: &TestProcessStartInfo) -> PlatformResult<u32> {
        self.correlator.request_launch(start_info)
    }
}
