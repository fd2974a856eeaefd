use crate::models::lesson::SharingMode;

/// Everything the sharing policy needs to know about one (lesson, learner)
/// pair, loaded fresh by the caller for every check. Access is never cached:
/// an instructor may change group links or exclusions between two requests
/// and the next evaluation must see the current state.
#[derive(Debug, Clone)]
pub struct AccessContext {
    /// Groups the learner belongs to.
    pub learner_group_ids: Vec<i32>,
    /// Groups linked to the lesson with an active association. Inactive
    /// links are filtered out before they get here.
    pub active_group_ids: Vec<i32>,
    /// Whether an exclusion row exists for this (lesson, learner) pair.
    pub is_excluded: bool,
}

/// Sharing policy evaluation for a learner. The owning instructor never goes
/// through this path; ownership is checked separately by the handlers.
pub fn can_access(mode: SharingMode, ctx: &AccessContext) -> bool {
    match mode {
        SharingMode::Private => false,
        SharingMode::Public => true,
        SharingMode::ClassRestricted => ctx
            .learner_group_ids
            .iter()
            .any(|group_id| ctx.active_group_ids.contains(group_id)),
        SharingMode::CustomExclusion => !ctx.is_excluded,
    }
}

/// Final gate for learner-facing lesson reads: a draft lesson is invisible
/// no matter what its sharing mode says.
pub fn can_open(is_published: bool, mode: SharingMode, ctx: &AccessContext) -> bool {
    is_published && can_access(mode, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(learner_groups: &[i32], active_groups: &[i32], excluded: bool) -> AccessContext {
        AccessContext {
            learner_group_ids: learner_groups.to_vec(),
            active_group_ids: active_groups.to_vec(),
            is_excluded: excluded,
        }
    }

    #[test]
    fn private_denies_every_learner() {
        assert!(!can_access(SharingMode::Private, &ctx(&[1, 2, 3], &[1, 2, 3], false)));
        assert!(!can_access(SharingMode::Private, &ctx(&[], &[], false)));
        assert!(!can_access(SharingMode::Private, &ctx(&[7], &[7], true)));
    }

    #[test]
    fn public_permits_every_learner() {
        assert!(can_access(SharingMode::Public, &ctx(&[], &[], false)));
        assert!(can_access(SharingMode::Public, &ctx(&[4], &[9], false)));
        // Exclusion rows are meaningless outside custom_exclusion mode.
        assert!(can_access(SharingMode::Public, &ctx(&[], &[], true)));
    }

    #[test]
    fn class_restricted_requires_active_membership_overlap() {
        assert!(can_access(SharingMode::ClassRestricted, &ctx(&[3], &[3], false)));
        assert!(can_access(SharingMode::ClassRestricted, &ctx(&[1, 3], &[2, 3], false)));
        assert!(!can_access(SharingMode::ClassRestricted, &ctx(&[1], &[2], false)));
        // No groups linked at all means nobody currently has access.
        assert!(!can_access(SharingMode::ClassRestricted, &ctx(&[1, 2], &[], false)));
        assert!(!can_access(SharingMode::ClassRestricted, &ctx(&[], &[1], false)));
    }

    #[test]
    fn deactivating_the_only_qualifying_link_revokes_access() {
        // The caller filters inactive links out of active_group_ids, so the
        // toggle shows up here as the group disappearing from the set.
        let before = ctx(&[5], &[5], false);
        let after = ctx(&[5], &[], false);
        assert!(can_access(SharingMode::ClassRestricted, &before));
        assert!(!can_access(SharingMode::ClassRestricted, &after));
    }

    #[test]
    fn custom_exclusion_denies_only_excluded_learners() {
        assert!(can_access(SharingMode::CustomExclusion, &ctx(&[], &[], false)));
        assert!(!can_access(SharingMode::CustomExclusion, &ctx(&[], &[], true)));
        // Group membership is irrelevant in this mode.
        assert!(can_access(SharingMode::CustomExclusion, &ctx(&[1], &[2], false)));
        assert!(!can_access(SharingMode::CustomExclusion, &ctx(&[1], &[1], true)));
    }

    #[test]
    fn removing_an_exclusion_restores_access() {
        assert!(!can_access(SharingMode::CustomExclusion, &ctx(&[], &[], true)));
        assert!(can_access(SharingMode::CustomExclusion, &ctx(&[], &[], false)));
    }

    #[test]
    fn unpublished_lesson_is_closed_even_when_public() {
        let open = ctx(&[], &[], false);
        assert!(!can_open(false, SharingMode::Public, &open));
        assert!(can_open(true, SharingMode::Public, &open));
    }

    #[test]
    fn can_open_combines_publish_flag_and_policy() {
        let member = ctx(&[2], &[2], false);
        assert!(can_open(true, SharingMode::ClassRestricted, &member));
        assert!(!can_open(false, SharingMode::ClassRestricted, &member));
        assert!(!can_open(true, SharingMode::Private, &member));
    }
}
