use crate::config::{AppConfig, AvoidMode};
use crate::identity::{GroupId, Grouping, IdentityGroup};
use crate::mapping::is_lexically_under;
use crate::model::{ContentKey, FileId, InodeKey, MediaFile};
use crate::scoring::{compare_candidates, QualityScore};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    /// Actionable: a better copy of the same content is kept.
    LowerQuality,
    /// Actionable: scores above the keeper, which wins because it is
    /// arr-managed or seeding.
    KeeperProtected,
    AvoidedLanguage,
    OutsideScope,
    RedundantProtected,
    InQueue,
    SharedInode,
}

impl PlanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanReason::LowerQuality => "lower_quality",
            PlanReason::KeeperProtected => "keeper_protected",
            PlanReason::AvoidedLanguage => "avoided_language",
            PlanReason::OutsideScope => "outside_scope",
            PlanReason::RedundantProtected => "redundant_protected",
            PlanReason::InQueue => "in_queue",
            PlanReason::SharedInode => "shared_inode",
        }
    }
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletePlanEntry {
    pub file: FileId,
    pub path: String,
    pub reason: PlanReason,
    pub group_id: GroupId,
    pub score: Option<QualityScore>,
    pub protected: bool,
    pub keeper: Option<String>,
}

/// Keeper chosen for one duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupDecision {
    pub group_id: GroupId,
    pub key: ContentKey,
    pub keeper: Option<FileId>,
    /// Every path sharing the keeper's inode.
    pub keeper_unit: Vec<FileId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletePlan {
    pub actionable: Vec<DeletePlanEntry>,
    pub report_only: Vec<DeletePlanEntry>,
    pub decisions: Vec<GroupDecision>,
}

impl DeletePlan {
    pub fn reclaimable_bytes(&self, files: &[MediaFile]) -> u64 {
        let mut seen = HashSet::new();
        self.actionable
            .iter()
            .filter(|e| seen.insert(files[e.file].inode_key()))
            .map(|e| files[e.file].size)
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct PlanPolicy {
    pub delete_scope: String,
    pub avoid_mode: AvoidMode,
    pub include_hardlinked: bool,
    pub protect_seeding: bool,
    pub protect_arr_managed: bool,
}

impl PlanPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            delete_scope: config.delete_scope.clone(),
            avoid_mode: config.languages.avoid_mode,
            include_hardlinked: config.include_hardlinked,
            protect_seeding: config.protect_seeding,
            protect_arr_managed: config.protect_arr_managed,
        }
    }
}

/// Paths of one group sharing a (device, inode) pair. Deleted together or
/// not at all. Protection flags already honor the policy switches.
struct Unit {
    members: Vec<FileId>,
    best: FileId,
    arr: bool,
    seeding: bool,
    queued: bool,
    avoided: bool,
}

impl Unit {
    fn protected(&self) -> bool {
        self.arr || self.seeding
    }
}

fn build_units(files: &[MediaFile], group: &IdentityGroup, policy: &PlanPolicy) -> Vec<Unit> {
    let mut by_inode: BTreeMap<InodeKey, Vec<FileId>> = BTreeMap::new();
    for &id in &group.members {
        by_inode.entry(files[id].inode_key()).or_default().push(id);
    }
    by_inode
        .into_values()
        .filter_map(|members| {
            let best = members
                .iter()
                .copied()
                .min_by(|&a, &b| compare_candidates(&files[a], &files[b]))?;
            Some(Unit {
                arr: policy.protect_arr_managed
                    && members.iter().any(|&id| files[id].protection.arr_managed()),
                seeding: policy.protect_seeding
                    && members.iter().any(|&id| files[id].protection.is_seeding()),
                queued: members.iter().any(|&id| files[id].protection.in_queue()),
                avoided: policy.avoid_mode == AvoidMode::Strict
                    && members.iter().any(|&id| files[id].avoided_language),
                best,
                members,
            })
        })
        .collect()
}

fn compare_units(files: &[MediaFile], a: &Unit, b: &Unit) -> Ordering {
    compare_candidates(&files[a.best], &files[b.best])
}

struct GroupPlan {
    decision: GroupDecision,
    candidates: Vec<DeletePlanEntry>,
    report_only: Vec<DeletePlanEntry>,
}

fn plan_group(files: &[MediaFile], group: &IdentityGroup, policy: &PlanPolicy) -> GroupPlan {
    let units = build_units(files, group, policy);
    let mut plan = GroupPlan {
        decision: GroupDecision {
            group_id: group.id,
            key: group.key.clone(),
            keeper: None,
            keeper_unit: Vec::new(),
        },
        candidates: Vec::new(),
        report_only: Vec::new(),
    };

    let eligible: Vec<usize> = (0..units.len()).filter(|&i| !units[i].avoided).collect();
    let arr_tier: Vec<usize> = eligible.iter().copied().filter(|&i| units[i].arr).collect();
    let seeding_tier: Vec<usize> = eligible.iter().copied().filter(|&i| units[i].seeding).collect();
    // Seeding protects nothing only when every unit seeds, avoided ones
    // included, and none is managed.
    let every_unit_seeds = units.iter().all(|u| u.seeding);
    let seeding_protects = !arr_tier.is_empty() || !every_unit_seeds;
    let tier = if !arr_tier.is_empty() {
        arr_tier
    } else if seeding_protects {
        seeding_tier
    } else {
        Vec::new()
    };
    let pool = if tier.is_empty() { &eligible } else { &tier };
    let keeper = pool
        .iter()
        .copied()
        .min_by(|&a, &b| compare_units(files, &units[a], &units[b]));

    let keeper_path = keeper.map(|k| files[units[k].best].path_str());
    let protected_keeper = keeper.filter(|&k| units[k].arr || (units[k].seeding && seeding_protects));
    if let Some(k) = keeper {
        plan.decision.keeper = Some(units[k].best);
        plan.decision.keeper_unit = units[k].members.clone();
    }

    let entry = |id: FileId, reason: PlanReason, protected: bool| DeletePlanEntry {
        file: id,
        path: files[id].path_str(),
        reason,
        group_id: group.id,
        score: files[id].score.clone(),
        protected,
        keeper: keeper_path.clone(),
    };

    for (i, unit) in units.iter().enumerate() {
        if Some(i) == keeper {
            continue;
        }
        let protected = unit.arr || (unit.seeding && seeding_protects);
        if unit.avoided {
            for &id in &unit.members {
                plan.report_only.push(entry(id, PlanReason::AvoidedLanguage, unit.protected()));
            }
        } else if protected {
            for &id in &unit.members {
                plan.report_only.push(entry(id, PlanReason::RedundantProtected, true));
            }
        } else if unit.queued {
            for &id in &unit.members {
                plan.report_only.push(entry(id, PlanReason::InQueue, true));
            }
        } else if unit
            .members
            .iter()
            .all(|&id| is_lexically_under(&files[id].path_str(), &policy.delete_scope))
        {
            let outranks_keeper = protected_keeper
                .map(|k| compare_units(files, unit, &units[k]) == Ordering::Less)
                .unwrap_or(false);
            let reason = if outranks_keeper {
                PlanReason::KeeperProtected
            } else {
                PlanReason::LowerQuality
            };
            for &id in &unit.members {
                plan.candidates.push(entry(id, reason, unit.protected()));
            }
        } else {
            for &id in &unit.members {
                plan.report_only.push(entry(id, PlanReason::OutsideScope, unit.protected()));
            }
        }
    }
    plan
}

/// Plans every duplicate group independently, then downgrades deletions
/// whose inode would survive through another path.
pub fn plan_deletions(files: &[MediaFile], grouping: &Grouping, policy: &PlanPolicy) -> DeletePlan {
    let mut plan = DeletePlan::default();
    let mut candidates = Vec::new();

    for group in grouping.duplicates() {
        let group_plan = plan_group(files, group, policy);
        if group_plan.decision.keeper.is_some() || !group_plan.report_only.is_empty() {
            plan.decisions.push(group_plan.decision);
        }
        candidates.extend(group_plan.candidates);
        plan.report_only.extend(group_plan.report_only);
    }

    let planned: HashSet<FileId> = candidates.iter().map(|e| e.file).collect();
    let mut catalog_links: HashMap<InodeKey, usize> = HashMap::new();
    let mut surviving: HashSet<InodeKey> = HashSet::new();
    for file in files {
        *catalog_links.entry(file.inode_key()).or_default() += 1;
        if !planned.contains(&file.id) {
            surviving.insert(file.inode_key());
        }
    }

    for mut entry in candidates {
        let file = &files[entry.file];
        let inode = file.inode_key();
        let linked_elsewhere = surviving.contains(&inode);
        let external_links = file.nlink as usize > catalog_links.get(&inode).copied().unwrap_or(0);
        if linked_elsewhere || (external_links && !policy.include_hardlinked) {
            debug!("Keeping {}: inode shared with a surviving path", entry.path);
            entry.reason = PlanReason::SharedInode;
            plan.report_only.push(entry);
        } else {
            plan.actionable.push(entry);
        }
    }

    plan.actionable.sort_by(|a, b| (a.group_id, &a.path).cmp(&(b.group_id, &b.path)));
    plan.report_only.sort_by(|a, b| (a.group_id, &a.path).cmp(&(b.group_id, &b.path)));

    info!(
        "Plan: {} groups decided, {} actionable, {} report-only",
        plan.decisions.len(),
        plan.actionable.len(),
        plan.report_only.len()
    );
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContentTypePolicy, LanguagePolicy, ScoreFactor};
    use crate::identity::{classify, group_files};
    use crate::model::{ArrMatch, QueueMatch, SeedingMatch};
    use crate::scoring::Scorer;
    use std::path::PathBuf;

    struct Fixture {
        files: Vec<MediaFile>,
        languages: LanguagePolicy,
        policy: PlanPolicy,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                files: Vec::new(),
                languages: LanguagePolicy::default(),
                policy: PlanPolicy {
                    delete_scope: String::new(),
                    avoid_mode: AvoidMode::IfNoPrefer,
                    include_hardlinked: false,
                    protect_seeding: true,
                    protect_arr_managed: true,
                },
            }
        }

        fn strict_avoid(&mut self, languages: &[&str]) {
            self.languages.avoid = languages.iter().map(|l| l.to_string()).collect();
            self.languages.avoid_mode = AvoidMode::Strict;
            self.policy.avoid_mode = AvoidMode::Strict;
        }

        fn add(&mut self, path: &str, inode: u64, nlink: u64) -> FileId {
            let id = self.files.len();
            let mut f = MediaFile::new(PathBuf::from(path), PathBuf::from("/media"), 1000, 1, inode, nlink);
            f.id = id;
            self.files.push(f);
            id
        }

        fn arr(&mut self, id: FileId) {
            self.files[id].protection.arr = Some(ArrMatch {
                instance: "sonarr".to_string(),
                custom_format_score: None,
                cutoff_met: None,
            });
        }

        fn seed(&mut self, id: FileId) {
            self.files[id].protection.seeding = Some(SeedingMatch {
                client: "qbittorrent".to_string(),
                torrent: "t".to_string(),
                nlink_at_match: self.files[id].nlink,
            });
        }

        fn queue(&mut self, id: FileId) {
            self.files[id].protection.queued = Some(QueueMatch {
                instance: "sonarr".to_string(),
                status: "downloading".to_string(),
                title: "Show.S01E01".to_string(),
            });
        }

        fn plan(&mut self, scope: &str) -> DeletePlan {
            classify(&mut self.files, ContentTypePolicy::Auto);
            let grouping = group_files(&self.files);
            let scorer = Scorer::new(
                vec![ScoreFactor::Resolution, ScoreFactor::Language, ScoreFactor::CustomFormat, ScoreFactor::Codec],
                &self.languages,
            );
            scorer.score_all(&mut self.files, &grouping);
            self.policy.delete_scope = scope.to_string();
            plan_deletions(&self.files, &grouping, &self.policy)
        }
    }

    fn reasons(entries: &[DeletePlanEntry]) -> Vec<(FileId, PlanReason)> {
        entries.iter().map(|e| (e.file, e.reason)).collect()
    }

    #[test]
    fn test_unprotected_lower_quality_is_actionable() {
        let mut fx = Fixture::new();
        let low = fx.add("/media/library/Show.S01E01.720p.mkv", 1, 1);
        let high = fx.add("/media/library/Show.S01E01.1080p.mkv", 2, 1);
        let plan = fx.plan("/media/library");
        assert_eq!(plan.decisions[0].keeper, Some(high));
        assert_eq!(reasons(&plan.actionable), vec![(low, PlanReason::LowerQuality)]);
        assert_eq!(plan.reclaimable_bytes(&fx.files), 1000);
    }

    #[test]
    fn test_arr_member_is_kept_over_better_unmanaged() {
        let mut fx = Fixture::new();
        let managed = fx.add("/media/library/Show.S01E01.720p.mkv", 1, 1);
        let better = fx.add("/media/library/Show.S01E01.2160p.mkv", 2, 1);
        fx.arr(managed);
        let plan = fx.plan("/media/library");
        assert_eq!(plan.decisions[0].keeper, Some(managed));
        assert_eq!(reasons(&plan.actionable), vec![(better, PlanReason::KeeperProtected)]);
    }

    #[test]
    fn test_worse_copy_beside_protected_keeper_stays_lower_quality() {
        let mut fx = Fixture::new();
        let managed = fx.add("/media/library/Show.S01E01.1080p.mkv", 1, 1);
        let worse = fx.add("/media/library/Show.S01E01.720p.mkv", 2, 1);
        let better = fx.add("/media/library/Show.S01E01.2160p.mkv", 3, 1);
        fx.arr(managed);
        let plan = fx.plan("/media/library");
        assert_eq!(plan.decisions[0].keeper, Some(managed));
        assert_eq!(
            reasons(&plan.actionable),
            vec![(better, PlanReason::KeeperProtected), (worse, PlanReason::LowerQuality)]
        );
    }

    #[test]
    fn test_multiple_arr_members_are_redundant_protected() {
        let mut fx = Fixture::new();
        let a = fx.add("/media/library/Show.S01E01.720p.mkv", 1, 1);
        let b = fx.add("/media/library/Show.S01E01.1080p.mkv", 2, 1);
        fx.arr(a);
        fx.arr(b);
        let plan = fx.plan("/media/library");
        assert_eq!(plan.decisions[0].keeper, Some(b));
        assert!(plan.actionable.is_empty());
        assert_eq!(reasons(&plan.report_only), vec![(a, PlanReason::RedundantProtected)]);
    }

    #[test]
    fn test_seeding_protects_unless_everything_seeds() {
        let mut fx = Fixture::new();
        let seeding = fx.add("/media/library/Show.S01E01.720p.mkv", 1, 1);
        let other = fx.add("/media/library/Show.S01E01.1080p.mkv", 2, 1);
        fx.seed(seeding);
        let plan = fx.plan("/media/library");
        assert_eq!(plan.decisions[0].keeper, Some(seeding));
        assert_eq!(reasons(&plan.actionable), vec![(other, PlanReason::LowerQuality)]);

        let mut fx = Fixture::new();
        let low = fx.add("/media/library/Show.S01E01.720p.mkv", 1, 1);
        let high = fx.add("/media/library/Show.S01E01.1080p.mkv", 2, 1);
        fx.seed(low);
        fx.seed(high);
        let plan = fx.plan("/media/library");
        assert_eq!(plan.decisions[0].keeper, Some(high));
        assert_eq!(reasons(&plan.actionable), vec![(low, PlanReason::LowerQuality)]);
        assert!(plan.actionable[0].protected);
    }

    #[test]
    fn test_avoided_non_seeding_copy_keeps_seeding_protection() {
        let mut fx = Fixture::new();
        let low = fx.add("/media/library/Show.S01E01.720p.mkv", 1, 1);
        let high = fx.add("/media/library/Show.S01E01.1080p.mkv", 2, 1);
        let french = fx.add("/media/library/Show.S01E01.2160p.FRENCH.mkv", 3, 1);
        fx.seed(low);
        fx.seed(high);
        fx.strict_avoid(&["fra"]);
        let plan = fx.plan("/media/library");

        assert!(fx.files[french].avoided_language);
        assert_eq!(plan.decisions[0].keeper, Some(high));
        assert!(plan.actionable.is_empty());
        assert_eq!(
            reasons(&plan.report_only),
            vec![(french, PlanReason::AvoidedLanguage), (low, PlanReason::RedundantProtected)]
        );
    }

    #[test]
    fn test_disabled_protection_switches() {
        let mut fx = Fixture::new();
        let managed = fx.add("/media/library/Show.S01E01.720p.mkv", 1, 1);
        let seeding = fx.add("/media/library/Show.S01E01.1080p.mkv", 2, 1);
        let best = fx.add("/media/library/Show.S01E01.2160p.mkv", 3, 1);
        fx.arr(managed);
        fx.seed(seeding);
        fx.policy.protect_arr_managed = false;
        fx.policy.protect_seeding = false;
        let plan = fx.plan("/media/library");
        assert_eq!(plan.decisions[0].keeper, Some(best));
        assert_eq!(
            reasons(&plan.actionable),
            vec![(seeding, PlanReason::LowerQuality), (managed, PlanReason::LowerQuality)]
        );
        assert!(plan.actionable.iter().all(|e| !e.protected));
    }

    #[test]
    fn test_queued_file_is_never_actionable() {
        let mut fx = Fixture::new();
        let queued = fx.add("/media/library/Show.S01E01.720p.mkv", 1, 1);
        let high = fx.add("/media/library/Show.S01E01.1080p.mkv", 2, 1);
        fx.queue(queued);
        let plan = fx.plan("/media/library");
        assert_eq!(plan.decisions[0].keeper, Some(high));
        assert!(plan.actionable.is_empty());
        assert_eq!(reasons(&plan.report_only), vec![(queued, PlanReason::InQueue)]);
        assert!(plan.report_only[0].protected);
    }

    #[test]
    fn test_outside_scope_is_report_only() {
        let mut fx = Fixture::new();
        let _keeper = fx.add("/media/library/Show.S01E01.1080p.mkv", 1, 1);
        let outside = fx.add("/media/torrents/Show.S01E01.720p.mkv", 2, 1);
        let plan = fx.plan("/media/library");
        assert!(plan.actionable.is_empty());
        assert_eq!(reasons(&plan.report_only), vec![(outside, PlanReason::OutsideScope)]);
    }

    #[test]
    fn test_co_inode_members_form_one_unit() {
        let mut fx = Fixture::new();
        let high = fx.add("/media/library/Show.S01E01.1080p.mkv", 1, 1);
        let a = fx.add("/media/library/a/Show.S01E01.720p.mkv", 2, 2);
        let b = fx.add("/media/library/b/Show.S01E01.720p.mkv", 2, 2);
        let plan = fx.plan("/media/library");
        assert_eq!(plan.decisions[0].keeper, Some(high));
        assert_eq!(
            reasons(&plan.actionable),
            vec![(a, PlanReason::LowerQuality), (b, PlanReason::LowerQuality)]
        );
        assert_eq!(plan.reclaimable_bytes(&fx.files), 1000);
    }

    #[test]
    fn test_partly_outside_unit_is_not_split() {
        let mut fx = Fixture::new();
        let _high = fx.add("/media/library/Show.S01E01.1080p.mkv", 1, 1);
        let inside = fx.add("/media/library/Show.S01E01.720p.mkv", 2, 2);
        let outside = fx.add("/media/torrents/Show.S01E01.720p.mkv", 2, 2);
        let plan = fx.plan("/media/library");
        assert!(plan.actionable.is_empty());
        assert_eq!(
            reasons(&plan.report_only),
            vec![(inside, PlanReason::OutsideScope), (outside, PlanReason::OutsideScope)]
        );
    }

    #[test]
    fn test_external_links_downgrade_to_shared_inode() {
        let mut fx = Fixture::new();
        let _high = fx.add("/media/library/Show.S01E01.1080p.mkv", 1, 1);
        let linked = fx.add("/media/library/Show.S01E01.720p.mkv", 2, 2);
        let plan = fx.plan("/media/library");
        assert!(plan.actionable.is_empty());
        assert_eq!(reasons(&plan.report_only), vec![(linked, PlanReason::SharedInode)]);
    }

    #[test]
    fn test_inode_surviving_in_another_group_is_not_deleted() {
        let mut fx = Fixture::new();
        let _keeper = fx.add("/media/library/Show.S01E01.1080p.mkv", 1, 1);
        let linked = fx.add("/media/library/Show.S01E01.720p.mkv", 2, 2);
        let _alias = fx.add("/media/library/misc/renamed clip.mkv", 2, 2);
        let plan = fx.plan("/media/library");
        assert!(plan.actionable.is_empty());
        assert_eq!(reasons(&plan.report_only), vec![(linked, PlanReason::SharedInode)]);
    }

    #[test]
    fn test_single_member_groups_are_ignored() {
        let mut fx = Fixture::new();
        fx.add("/media/library/Show.S01E01.1080p.mkv", 1, 1);
        fx.add("/media/library/Show.S01E02.1080p.mkv", 2, 1);
        let plan = fx.plan("/media/library");
        assert!(plan.decisions.is_empty());
        assert!(plan.actionable.is_empty());
        assert!(plan.report_only.is_empty());
    }
}
