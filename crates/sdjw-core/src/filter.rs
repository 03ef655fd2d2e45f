//! Keyword filter for secondary social-studies teaching positions.
//!
//! Pure predicate over the job title: subject inclusion, role-word
//! exclusion, and a grade-level check. Matching is case-insensitive
//! substring containment only; no stemming, no locale handling beyond
//! case folding.

use crate::JobRecord;

const SUBJECT_KEYWORDS: &[&str] = &[
    "social studies",
    "history",
    "civics",
    "government",
    "economics",
    "geography",
    "political science",
    "world cultures",
    "american studies",
    "global studies",
    "us history",
    "world history",
    "american history",
    "ap history",
    "ap government",
    "ap economics",
    "humanities",
    "sociology",
    "psychology",
    "current events",
];

// Any of these forces a non-match regardless of subject keywords.
const ROLE_EXCLUSIONS: &[&str] = &[
    "aide",
    "paraprofessional",
    "assistant",
    "pca",
    "custodian",
    "maintenance",
    "cafeteria",
    "food service",
    "secretary",
    "clerical",
    "bus driver",
    "transportation",
    "nurse",
    "support staff",
    "substitute",
];

const SECONDARY_KEYWORDS: &[&str] = &[
    "middle school",
    "high school",
    "secondary",
    "junior high",
    "6th grade",
    "7th grade",
    "8th grade",
    "9th grade",
    "10th grade",
    "11th grade",
    "12th grade",
    "grade 6",
    "grade 7",
    "grade 8",
    "grade 9",
    "grade 10",
    "grade 11",
    "grade 12",
    "grades 6-12",
    "6-12",
    "7-12",
    "6-8",
    "9-12",
];

const ELEMENTARY_KEYWORDS: &[&str] = &[
    "elementary",
    "primary school",
    "kindergarten",
    "pre-k",
    "prek",
    "preschool",
    "1st grade",
    "2nd grade",
    "3rd grade",
    "4th grade",
    "5th grade",
    "grade 1",
    "grade 2",
    "grade 3",
    "grade 4",
    "grade 5",
    "k-3",
    "k-4",
    "k-5",
    "k-6",
];

/// Does this posting look like a secondary-level social studies position?
pub fn matches(job: &JobRecord) -> bool {
    let title = job.title.to_lowercase();
    is_subject_match(&title) && !is_excluded_role(&title) && is_secondary_level(&title)
}

fn is_subject_match(title: &str) -> bool {
    SUBJECT_KEYWORDS.iter().any(|kw| title.contains(kw))
}

fn is_excluded_role(title: &str) -> bool {
    ROLE_EXCLUSIONS.iter().any(|kw| title.contains(kw))
}

/// Explicit elementary markers exclude; explicit secondary markers include;
/// titles with no grade signal at all pass through. That catches generic
/// "Social Studies Teacher" postings that could be any level.
fn is_secondary_level(title: &str) -> bool {
    if ELEMENTARY_KEYWORDS.iter().any(|kw| title.contains(kw)) {
        return false;
    }
    if SECONDARY_KEYWORDS.iter().any(|kw| title.contains(kw)) {
        return true;
    }
    true
}

/// Apply the filter to a whole batch, preserving order.
pub fn apply(jobs: Vec<JobRecord>) -> Vec<JobRecord> {
    jobs.into_iter().filter(matches).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PortalType;

    fn job(title: &str) -> JobRecord {
        JobRecord::new("Mt. Lebanon", title, "https://example.org/posting", PortalType::AppliTrack)
            .unwrap()
    }

    #[test]
    fn secondary_social_studies_titles_match() {
        assert!(matches(&job("Social Studies Teacher - High School")));
        assert!(matches(&job("History Teacher, Grades 6-12")));
        assert!(matches(&job("AP Government Instructor - Secondary")));
    }

    #[test]
    fn exclusion_words_override_subject_match() {
        assert!(!matches(&job("Paraprofessional - Social Studies Support")));
        assert!(!matches(&job("Social Studies Classroom Aide")));
        assert!(!matches(&job("Long-Term Substitute - World History")));
    }

    #[test]
    fn elementary_markers_exclude() {
        assert!(!matches(&job("Elementary Social Studies Enrichment")));
        assert!(!matches(&job("Social Studies Teacher, Grade 4")));
        assert!(!matches(&job("K-5 Humanities Teacher")));
    }

    #[test]
    fn no_grade_signal_passes_through() {
        assert!(matches(&job("Social Studies Teacher")));
        assert!(matches(&job("Economics and Civics Teacher")));
    }

    #[test]
    fn unrelated_subjects_do_not_match() {
        assert!(!matches(&job("Mathematics Teacher - High School")));
        assert!(!matches(&job("Band Director")));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(matches(&job("SOCIAL STUDIES TEACHER - HIGH SCHOOL")));
    }

    #[test]
    fn apply_preserves_batch_order() {
        let kept = apply(vec![
            job("Social Studies Teacher - High School"),
            job("Mathematics Teacher"),
            job("History Teacher, Grades 6-12"),
        ]);
        let titles: Vec<_> = kept.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Social Studies Teacher - High School",
                "History Teacher, Grades 6-12"
            ]
        );
    }
}
