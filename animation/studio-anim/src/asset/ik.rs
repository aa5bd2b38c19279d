use glam::Vec3;

use super::sequence::BoneChannels;

/// How an IK rule positions its chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum IkRuleType {
    /// Pin the foot relative to a bone (or the root) of the same model
    #[default]
    SelfRelative,
    /// Pin the foot to a world position
    World,
    /// Plant the foot on the ground below it
    Ground,
    /// Fade the chain out of IK
    Release,
    /// Pin the foot to an external attachment
    Attachment,
    /// Drop any latched pose without fading IK
    Unlatch,
}

/// One link of a 3-bone IK chain
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct IkLink {
    /// Bone driven by this link
    pub bone: usize,
    /// Preferred knee direction in bone space, zero when unset
    pub knee_dir: Vec3,
}

impl IkLink {
    /// Create a link without a preferred knee direction
    pub fn new(bone: usize) -> Self {
        Self {
            bone,
            knee_dir: Vec3::ZERO,
        }
    }
}

/// A hip/knee/foot chain
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct IkChainDef {
    /// Chain name
    pub name: String,
    /// Hip, knee and foot links
    pub links: [IkLink; 3],
}

impl IkChainDef {
    /// Create a chain from hip, knee and foot bones
    pub fn new<S: Into<String>>(name: S, hip: usize, knee: usize, foot: usize) -> Self {
        Self {
            name: name.into(),
            links: [IkLink::new(hip), IkLink::new(knee), IkLink::new(foot)],
        }
    }

    /// Set the preferred knee direction, in hip space
    pub fn with_knee_dir(mut self, knee_dir: Vec3) -> Self {
        self.links[0].knee_dir = knee_dir;
        self
    }

    /// Hip bone
    pub fn hip(&self) -> usize {
        self.links[0].bone
    }

    /// Knee bone
    pub fn knee(&self) -> usize {
        self.links[1].bone
    }

    /// Foot bone
    pub fn foot(&self) -> usize {
        self.links[2].bone
    }

    /// Preferred knee direction, if set
    pub fn knee_dir(&self) -> Option<Vec3> {
        let dir = self.links[0].knee_dir;
        (dir != Vec3::ZERO).then_some(dir)
    }
}

/// A one-shot pin of a chain's foot to its pre-blend world pose
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct IkLockDef {
    /// Locked chain
    pub chain: usize,
    /// How far the foot returns to its locked position
    pub pos_weight: f32,
    /// How far the foot's local orientation returns to the animated one
    pub local_q_weight: f32,
}

impl IkLockDef {
    /// Create a lock for `chain`
    pub fn new(chain: usize, pos_weight: f32, local_q_weight: f32) -> Self {
        Self {
            chain,
            pos_weight,
            local_q_weight,
        }
    }
}

/// Animated foot error relative to the rule's reference frame
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct IkErrorTrack {
    /// Decoder scale of the six channels
    pub scale: [f32; 6],
    /// Channel data indexed from the rule's first frame
    pub channels: BoneChannels,
}

/// An IK rule authored on a sub-animation
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct IkRuleDef {
    /// Affected chain
    pub chain: usize,
    /// Rule type
    pub kind: IkRuleType,
    /// Target slot for ground and attachment rules
    pub slot: usize,
    /// Reference bone for self-relative rules
    pub bone: Option<usize>,
    /// Attachment for attachment rules
    pub attachment: usize,
    /// Foot pad height above the ground
    pub height: f32,
    /// Ground height relative to the root
    pub floor: f32,
    /// Foot pad radius
    pub radius: f32,
    /// Maximum drop below the animated position
    pub drop: f32,
    /// Maximum lift above the animated position
    pub top: f32,
    /// Cycle where the rule starts
    pub start: f32,
    /// Cycle where the rule reaches full weight
    pub peak: f32,
    /// Cycle where the rule starts fading
    pub tail: f32,
    /// Cycle where the rule ends
    pub end: f32,
    /// Frame the error track starts at
    pub first_frame: usize,
    /// Animated foot error track
    pub error: Option<IkErrorTrack>,
}

impl IkRuleDef {
    /// Create a rule spanning the whole cycle
    pub fn new(chain: usize, kind: IkRuleType) -> Self {
        Self {
            chain,
            kind,
            slot: 0,
            bone: None,
            attachment: 0,
            height: 0.0,
            floor: 0.0,
            radius: 0.0,
            drop: 0.0,
            top: 0.0,
            start: 0.0,
            peak: 0.0,
            tail: 1.0,
            end: 1.0,
            first_frame: 0,
            error: None,
        }
    }

    /// Set the activation window
    pub fn with_window(mut self, start: f32, peak: f32, tail: f32, end: f32) -> Self {
        self.start = start;
        self.peak = peak;
        self.tail = tail;
        self.end = end;
        self
    }

    /// Set the target slot
    pub fn with_slot(mut self, slot: usize) -> Self {
        self.slot = slot;
        self
    }

    /// Set the reference bone
    pub fn with_bone(mut self, bone: usize) -> Self {
        self.bone = Some(bone);
        self
    }

    /// Set the foot pad geometry
    pub fn with_foot(mut self, height: f32, floor: f32, radius: f32) -> Self {
        self.height = height;
        self.floor = floor;
        self.radius = radius;
        self
    }

    /// Set the error track
    pub fn with_error(mut self, first_frame: usize, error: IkErrorTrack) -> Self {
        self.first_frame = first_frame;
        self.error = Some(error);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_accessors() {
        let chain = IkChainDef::new("leg_l", 1, 2, 3);
        assert_eq!((chain.hip(), chain.knee(), chain.foot()), (1, 2, 3));
        assert_eq!(chain.knee_dir(), None);

        let chain = chain.with_knee_dir(Vec3::X);
        assert_eq!(chain.knee_dir(), Some(Vec3::X));
    }

    #[test]
    fn test_rule_defaults() {
        let rule = IkRuleDef::new(0, IkRuleType::Ground).with_window(0.1, 0.2, 0.6, 0.7);
        assert_eq!(rule.kind, IkRuleType::Ground);
        assert!((rule.tail - 0.6).abs() < f32::EPSILON);
        assert!(rule.error.is_none());
    }
}
