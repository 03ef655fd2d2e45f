//! Fixture-driven parsing tests: one captured listing page per portal
//! family, checked against the records the adapter should extract.

use std::path::{Path, PathBuf};

use sdjw_adapters::{
    parse_applitrack, parse_district_site, parse_paeducator, parse_powerschool, parse_schoolspring,
};
use sdjw_core::PortalType;

fn fixture(portal_dir: &str) -> String {
    let path: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures")
        .join(portal_dir)
        .join("listing.html");
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

#[test]
fn applitrack_extracts_categories_and_drops_counts() {
    let html = fixture("applitrack");
    let jobs = parse_applitrack(
        &html,
        "https://www.applitrack.com/mtlsd/onlineapp/default.aspx",
        "Mt. Lebanon School District",
    )
    .unwrap();

    let titles: Vec<_> = jobs.iter().map(|j| j.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Administration",
            "Teaching - High School",
            "Teaching - Middle School",
            "Support Staff",
        ]
    );
    assert!(jobs.iter().all(|j| j.portal_type == PortalType::AppliTrack));
    assert!(jobs.iter().all(|j| j.district == "Mt. Lebanon School District"));
    assert_eq!(
        jobs[1].url,
        "https://www.applitrack.com/mtlsd/onlineapp/Postings.aspx?Category=4"
    );
}

#[test]
fn powerschool_extracts_posting_links_and_dedups_by_url() {
    let html = fixture("powerschool");
    let jobs = parse_powerschool(
        &html,
        "https://bethelpark.tedk12.com/hire/index.aspx",
        "Bethel Park School District",
    )
    .unwrap();

    let titles: Vec<_> = jobs.iter().map(|j| j.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Social Studies Teacher - High School",
            "School Counselor",
            "Custodian - Night Shift",
        ]
    );
    assert_eq!(
        jobs[0].url,
        "https://bethelpark.tedk12.com/hire/ViewJob.aspx?JobID=2101"
    );
}

#[test]
fn paeducator_keeps_only_the_filtered_district_and_trims_suffix() {
    let html = fixture("paeducator");
    let jobs = parse_paeducator(
        &html,
        "https://www.pa-educator.net/Search",
        "Keystone Oaks School District",
        "Keystone Oaks",
    )
    .unwrap();

    let titles: Vec<_> = jobs.iter().map(|j| j.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "History Teacher, Grades 6-12",
            "Elementary Classroom Teacher",
            "Social Studies Teacher",
        ]
    );
    assert!(jobs
        .iter()
        .all(|j| j.district == "Keystone Oaks School District"));
    assert_eq!(jobs[0].url, "https://www.pa-educator.net/job/88231");
}

#[test]
fn schoolspring_skips_nav_noise_and_email_cards() {
    let html = fixture("schoolspring");
    let jobs = parse_schoolspring(
        &html,
        "https://schoolspring.com/district/woodland-hills",
        "Woodland Hills School District",
    )
    .unwrap();

    let titles: Vec<_> = jobs.iter().map(|j| j.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Social Studies Teacher - Middle School",
            "Spanish Teacher",
            "Instructional Aide",
        ]
    );
    assert_eq!(jobs[0].url, "https://schoolspring.com/job/412233");
}

#[test]
fn district_site_uses_generic_heuristics_and_skips_nav() {
    let html = fixture("district-site");
    let jobs = parse_district_site(
        &html,
        "https://www.fortcherry.org/employment",
        "Fort Cherry School District",
    )
    .unwrap();

    let titles: Vec<_> = jobs.iter().map(|j| j.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["Social Studies Teacher (Anticipated)", "Bus Driver"]
    );
    assert_eq!(
        jobs[0].url,
        "https://www.fortcherry.org/employment/social-studies-teacher.pdf"
    );
}
