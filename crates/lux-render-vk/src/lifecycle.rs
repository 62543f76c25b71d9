// SPDX-License-Identifier: CEPL-1.0
//! Initialisation states and the ordered swapchain teardown/rebuild protocol.

use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Named initialisation states, in the only order the engine moves through them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineState {
    Uninitialized,
    InstanceReady,
    SurfaceReady,
    DeviceReady,
    SwapchainReady,
    PipelineReady,
    CommandsReady,
    Running,
    TornDown,
}

impl EngineState {
    pub fn next(self) -> Option<Self> {
        use EngineState::*;
        Some(match self {
            Uninitialized => InstanceReady,
            InstanceReady => SurfaceReady,
            SurfaceReady => DeviceReady,
            DeviceReady => SwapchainReady,
            SwapchainReady => PipelineReady,
            PipelineReady => CommandsReady,
            CommandsReady => Running,
            Running | TornDown => return None,
        })
    }

    pub fn require(self, expected: EngineState, op: &'static str) -> EngineResult<()> {
        if self == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                op,
                expected,
                actual: self,
            })
        }
    }
}

/// Objects rebuilt with the swapchain. Device, surface, pool and semaphores outlive them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    Swapchain,
    ImageViews,
    RenderPass,
    Pipeline,
    Framebuffers,
    CommandBuffers,
}

impl Resource {
    pub const ALL: [Resource; 6] = [
        Resource::Swapchain,
        Resource::ImageViews,
        Resource::RenderPass,
        Resource::Pipeline,
        Resource::Framebuffers,
        Resource::CommandBuffers,
    ];

    /// Objects that must be alive while this one exists.
    pub fn depends_on(self) -> &'static [Resource] {
        match self {
            Resource::Swapchain => &[],
            Resource::ImageViews => &[Resource::Swapchain],
            // Format comes from the swapchain.
            Resource::RenderPass => &[Resource::Swapchain],
            // Extent is baked into the viewport.
            Resource::Pipeline => &[Resource::RenderPass, Resource::Swapchain],
            Resource::Framebuffers => &[Resource::RenderPass, Resource::ImageViews],
            Resource::CommandBuffers => &[
                Resource::Framebuffers,
                Resource::Pipeline,
                Resource::RenderPass,
            ],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    WaitIdle,
    Destroy(Resource),
    Create(Resource),
}

pub const RECREATE_STEPS: [Step; 13] = [
    Step::WaitIdle,
    Step::Destroy(Resource::CommandBuffers),
    Step::Destroy(Resource::Framebuffers),
    Step::Destroy(Resource::Pipeline),
    Step::Destroy(Resource::ImageViews),
    Step::Destroy(Resource::RenderPass),
    Step::Destroy(Resource::Swapchain),
    Step::Create(Resource::Swapchain),
    Step::Create(Resource::ImageViews),
    Step::Create(Resource::RenderPass),
    Step::Create(Resource::Pipeline),
    Step::Create(Resource::Framebuffers),
    Step::Create(Resource::CommandBuffers),
];

/// Idle wait plus destruction, newest first. Also the swapchain half of teardown.
pub fn destroy_steps() -> &'static [Step] {
    &RECREATE_STEPS[..7]
}

/// Creation half, also used for the first build.
pub fn create_steps() -> &'static [Step] {
    &RECREATE_STEPS[7..]
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderViolation {
    /// Destroyed while `dependent` still referenced it.
    DestroyedWhileReferenced { step: usize, resource: Resource, dependent: Resource },
    /// Created while `missing` was not alive.
    CreatedWithoutDependency { step: usize, resource: Resource, missing: Resource },
    DestroyedTwice { step: usize, resource: Resource },
    CreatedTwice { step: usize, resource: Resource },
    /// Something was destroyed before the GPU was known to be idle.
    NotIdle { step: usize },
}

impl fmt::Display for OrderViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Replays `steps` against a set of live objects and reports the first step
/// that would leave a dangling reference.
pub fn check_order(steps: &[Step], initially_live: &[Resource]) -> Result<(), OrderViolation> {
    let mut live: Vec<Resource> = initially_live.to_vec();
    let mut idle = false;

    for (step, s) in steps.iter().enumerate() {
        match *s {
            Step::WaitIdle => idle = true,
            Step::Destroy(resource) => {
                if !idle {
                    return Err(OrderViolation::NotIdle { step });
                }
                if !live.contains(&resource) {
                    return Err(OrderViolation::DestroyedTwice { step, resource });
                }
                if let Some(&dependent) = live
                    .iter()
                    .find(|r| r.depends_on().contains(&resource))
                {
                    return Err(OrderViolation::DestroyedWhileReferenced {
                        step,
                        resource,
                        dependent,
                    });
                }
                live.retain(|&r| r != resource);
            }
            Step::Create(resource) => {
                if live.contains(&resource) {
                    return Err(OrderViolation::CreatedTwice { step, resource });
                }
                if let Some(&missing) = resource.depends_on().iter().find(|d| !live.contains(d)) {
                    return Err(OrderViolation::CreatedWithoutDependency {
                        step,
                        resource,
                        missing,
                    });
                }
                live.push(resource);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_advance_in_order() {
        let mut s = EngineState::Uninitialized;
        let mut seen = vec![s];
        while let Some(n) = s.next() {
            assert!(n > s);
            s = n;
            seen.push(s);
        }
        assert_eq!(s, EngineState::Running);
        assert_eq!(seen.len(), 8);
        assert_eq!(EngineState::TornDown.next(), None);
    }

    #[test]
    fn guard_reports_expected_and_actual() {
        EngineState::Running.require(EngineState::Running, "draw_frame").unwrap();
        let err = EngineState::DeviceReady
            .require(EngineState::Running, "draw_frame")
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                op: "draw_frame",
                expected: EngineState::Running,
                actual: EngineState::DeviceReady
            }
        ));
    }

    #[test]
    fn recreate_protocol_never_dangles() {
        check_order(&RECREATE_STEPS, &Resource::ALL).unwrap();
    }

    #[test]
    fn recreate_protocol_is_repeatable() {
        let twice: Vec<Step> = RECREATE_STEPS.iter().chain(RECREATE_STEPS.iter()).copied().collect();
        check_order(&twice, &Resource::ALL).unwrap();
    }

    #[test]
    fn first_build_and_teardown_halves_are_valid() {
        check_order(create_steps(), &[]).unwrap();
        check_order(destroy_steps(), &Resource::ALL).unwrap();
    }

    #[test]
    fn every_resource_destroyed_then_created_exactly_once() {
        for r in Resource::ALL {
            let destroyed: Vec<usize> = RECREATE_STEPS
                .iter()
                .enumerate()
                .filter(|(_, s)| **s == Step::Destroy(r))
                .map(|(i, _)| i)
                .collect();
            let created: Vec<usize> = RECREATE_STEPS
                .iter()
                .enumerate()
                .filter(|(_, s)| **s == Step::Create(r))
                .map(|(i, _)| i)
                .collect();
            assert_eq!(destroyed.len(), 1, "{r:?}");
            assert_eq!(created.len(), 1, "{r:?}");
            assert!(destroyed[0] < created[0], "{r:?}");
        }
    }

    #[test]
    fn every_adjacent_swap_of_dependent_steps_is_caught() {
        for i in 1..RECREATE_STEPS.len() - 1 {
            let (a, b) = (RECREATE_STEPS[i], RECREATE_STEPS[i + 1]);
            let dependent = match (a, b) {
                (Step::Destroy(x), Step::Destroy(y)) => x.depends_on().contains(&y),
                (Step::Create(x), Step::Create(y)) => y.depends_on().contains(&x),
                _ => true,
            };
            let mut swapped = RECREATE_STEPS;
            swapped.swap(i, i + 1);
            assert_eq!(
                check_order(&swapped, &Resource::ALL).is_err(),
                dependent,
                "swap of {a:?} and {b:?}"
            );
        }
    }

    #[test]
    fn render_pass_before_pipeline_is_rejected() {
        let steps = [
            Step::WaitIdle,
            Step::Destroy(Resource::CommandBuffers),
            Step::Destroy(Resource::Framebuffers),
            Step::Destroy(Resource::RenderPass),
        ];
        assert_eq!(
            check_order(&steps, &Resource::ALL),
            Err(OrderViolation::DestroyedWhileReferenced {
                step: 3,
                resource: Resource::RenderPass,
                dependent: Resource::Pipeline
            })
        );
    }

    #[test]
    fn destroy_without_idle_is_rejected() {
        let steps = [Step::Destroy(Resource::CommandBuffers)];
        assert_eq!(
            check_order(&steps, &Resource::ALL),
            Err(OrderViolation::NotIdle { step: 0 })
        );
    }

    #[test]
    fn create_without_dependency_is_rejected() {
        let steps = [Step::Create(Resource::Framebuffers)];
        assert!(matches!(
            check_order(&steps, &[Resource::Swapchain, Resource::ImageViews]),
            Err(OrderViolation::CreatedWithoutDependency {
                resource: Resource::Framebuffers,
                missing: Resource::RenderPass,
                ..
            })
        ));
    }
}
