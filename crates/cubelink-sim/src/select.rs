use std::os::fd::AsRawFd;
use std::time::Duration;

use cubelink_transport::{PollReadiness, Readiness};
use tracing::trace;

use crate::cube::CubeProcess;
use crate::error::{Result, SimError};

/// Block until at least one cube has data and return exactly those cubes.
///
/// Cubes whose transport already holds complete frames are ready without
/// touching the OS. The wait is level-triggered: call again after draining
/// to learn about newer data.
pub fn select_on<'a, I>(instances: I) -> Result<Vec<&'a mut CubeProcess>>
where
    I: IntoIterator<Item = &'a mut CubeProcess>,
{
    select_on_with(instances, &PollReadiness, None)
}

/// [`select_on`] with an explicit readiness primitive and optional timeout.
///
/// An elapsed timeout returns an empty vector.
pub fn select_on_with<'a, I, R>(
    instances: I,
    readiness: &R,
    timeout: Option<Duration>,
) -> Result<Vec<&'a mut CubeProcess>>
where
    I: IntoIterator<Item = &'a mut CubeProcess>,
    R: Readiness + ?Sized,
{
    let cubes: Vec<&'a mut CubeProcess> = instances.into_iter().collect();
    if cubes.is_empty() {
        return Ok(Vec::new());
    }

    let mut fds = Vec::with_capacity(cubes.len());
    let mut ready = vec![false; cubes.len()];
    for (index, cube) in cubes.iter().enumerate() {
        let transport = cube
            .transport()
            .ok_or_else(|| SimError::NoChannel(cube.label()))?;
        fds.push(transport.get_ref().as_raw_fd());
        ready[index] = transport.has_buffered();
    }

    // Something is already buffered: only pick up what else is readable now.
    let wait = if ready.iter().any(|r| *r) {
        Some(Duration::ZERO)
    } else {
        timeout
    };

    for index in readiness.wait_readable(&fds, wait)? {
        if let Some(flag) = ready.get_mut(index) {
            *flag = true;
        }
    }
    trace!(total = cubes.len(), ready = ready.iter().filter(|r| **r).count(), "select");

    Ok(cubes
        .into_iter()
        .zip(ready)
        .filter_map(|(cube, is_ready)| is_ready.then_some(cube))
        .collect())
}
