//! End-to-end behaviour of `GenericRepository` over the in-memory store

use entity_repository::prelude::*;
use entity_repository::store::MemoryStore;

#[derive(Debug, Clone, PartialEq)]
struct Member {
    id: i64,
    club_id: i64,
    name: String,
    nickname: Option<String>,
    rating: f64,
}

impl Member {
    fn new(club_id: i64, name: &str) -> Self {
        Self {
            id: 0,
            club_id,
            name: name.to_string(),
            nickname: None,
            rating: 1200.0,
        }
    }
}

impl Entity for Member {
    const NAME: &'static str = "Member";
    const TABLE: &'static str = "members";
    const COLUMNS: &'static [&'static str] = &["id", "club_id", "name", "nickname", "rating"];

    fn key(&self) -> i64 {
        self.id
    }

    fn set_key(&mut self, key: i64) {
        self.id = key;
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("club_id", self.club_id)
            .with("name", self.name.as_str())
            .with("nickname", self.nickname.clone())
            .with("rating", self.rating)
    }

    fn from_row(row: &Row) -> RepositoryResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            club_id: row.get("club_id")?,
            name: row.get("name")?,
            nickname: row.get("nickname")?,
            rating: row.get("rating")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Club {
    id: i64,
    title: String,
}

impl Entity for Club {
    const NAME: &'static str = "Club";
    const TABLE: &'static str = "clubs";
    const COLUMNS: &'static [&'static str] = &["id", "title"];

    fn key(&self) -> i64 {
        self.id
    }

    fn set_key(&mut self, key: i64) {
        self.id = key;
    }

    fn to_row(&self) -> Row {
        Row::new().with("id", self.id).with("title", self.title.as_str())
    }

    fn from_row(row: &Row) -> RepositoryResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
        })
    }
}

/// Summary projection that never includes the filter column
#[derive(Debug, Clone, PartialEq)]
struct MemberName {
    id: i64,
    name: String,
}

fn member_name() -> Selector<MemberName> {
    Selector::new(["id", "name"], |row: &Row| {
        Ok(MemberName {
            id: row.get("id")?,
            name: row.get("name")?,
        })
    })
    .unwrap()
}

async fn members_with(count: usize) -> GenericRepository<Member, MemoryStore> {
    let repo = GenericRepository::new(MemoryStore::new());
    for i in 0..count {
        let mut member = Member::new((i % 2) as i64 + 1, &format!("member-{:03}", i));
        if i % 5 == 0 {
            member.nickname = Some(format!("nick-{}", i));
        }
        repo.add(&mut member).await.unwrap();
    }
    repo
}

#[tokio::test]
async fn test_added_entities_read_back_equal() {
    let repo = GenericRepository::<Member, _>::new(MemoryStore::new());
    let mut stored = Vec::new();
    for name in ["ada", "grace", "edsger"] {
        let mut member = Member::new(1, name);
        member.nickname = Some(name.to_uppercase());
        member.rating = 1500.5;
        repo.add(&mut member).await.unwrap();
        assert_ne!(member.id, 0);
        stored.push(member);
    }

    for member in &stored {
        assert_eq!(repo.get(member.id).await.unwrap().as_ref(), Some(member));
    }
}

#[tokio::test]
async fn test_page_sizes_follow_the_window_formula() {
    for total in [0_usize, 1, 9, 10, 11, 25] {
        let repo = members_with(total).await;
        for size in [1_u32, 3, 10] {
            for number in 1_u32..=5 {
                let rows = repo
                    .get_selected_columns_with_pagination(
                        member_name(),
                        Tracking::Detached,
                        Page::new(number, size).unwrap(),
                    )
                    .await
                    .unwrap();
                let skipped = (number as usize - 1) * size as usize;
                let expected = (size as usize).min(total.saturating_sub(skipped));
                assert_eq!(rows.len(), expected, "total={total} page={number} size={size}");
            }
        }
    }
}

#[tokio::test]
async fn test_pages_concatenate_to_the_full_projection() {
    let repo = members_with(23).await;
    let full = repo
        .get_selected_columns(member_name(), Tracking::Detached)
        .await
        .unwrap();

    let mut stitched = Vec::new();
    let mut page = Page::first(4).unwrap();
    loop {
        let rows = repo
            .get_selected_columns_with_pagination(member_name(), Tracking::Detached, page)
            .await
            .unwrap();
        if rows.is_empty() {
            break;
        }
        stitched.extend(rows);
        page = page.next();
    }
    assert_eq!(stitched, full);
}

#[tokio::test]
async fn test_pages_window_the_filtered_subset() {
    let repo = members_with(20).await;
    let in_club_two: Filter = FilterCondition::eq("club_id", 2_i64).into();

    let subset = repo
        .get_selected_columns_filtered(member_name(), in_club_two.clone(), Tracking::Detached)
        .await
        .unwrap();
    assert_eq!(subset.len(), 10);

    let page_two = repo
        .get_selected_columns_filtered_with_pagination(
            member_name(),
            in_club_two,
            Tracking::Detached,
            Page::new(2, 3).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(page_two, subset[3..6].to_vec());
}

#[tokio::test]
async fn test_null_aware_filters() {
    let repo = members_with(11).await;

    let nicknamed = repo
        .count_filtered(FilterCondition::is_not_null("nickname").into())
        .await
        .unwrap();
    assert_eq!(nicknamed, 3);

    // comparisons against NULL never match, in either direction
    let named = repo
        .count_filtered(FilterCondition::eq("nickname", "nick-0").into())
        .await
        .unwrap();
    let not_named = repo
        .count_filtered(Filter::from(FilterCondition::eq("nickname", "nick-0")).negate())
        .await
        .unwrap();
    assert_eq!((named, not_named), (1, 2));
}

#[tokio::test]
async fn test_missing_search_restricts_nothing() {
    let repo = members_with(8).await;
    let page = Page::first(100).unwrap();

    let all = repo
        .get_selected_columns_with_pagination_and_search(member_name(), None, page, Tracking::Detached)
        .await
        .unwrap();
    assert_eq!(all.len(), 8);

    let matched = repo
        .get_selected_columns_with_pagination_and_search(
            member_name(),
            Filter::search(["name", "nickname"], "NICK-5"),
            page,
            Tracking::Detached,
        )
        .await
        .unwrap();
    assert_eq!(
        matched,
        vec![MemberName {
            id: 6,
            name: "member-005".into()
        }]
    );
}

#[tokio::test]
async fn test_search_escapes_wildcards() {
    let repo = GenericRepository::<Member, _>::new(MemoryStore::new());
    repo.add(&mut Member::new(1, "100%_real")).await.unwrap();
    repo.add(&mut Member::new(1, "100 real")).await.unwrap();

    let found = repo
        .get_selected_columns_with_pagination_and_search(
            member_name(),
            Filter::search(["name"], "0%_"),
            Page::first(10).unwrap(),
            Tracking::Detached,
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "100%_real");
}

#[tokio::test]
async fn test_tracking_mode_never_changes_rows() {
    let repo = members_with(9).await;
    let filter: Filter = FilterCondition::gte("id", 4_i64).into();
    let page = Page::new(1, 3).unwrap();

    let tracked = repo
        .get_selected_columns_filtered_with_pagination(
            member_name(),
            filter.clone(),
            Tracking::Tracked,
            page,
        )
        .await
        .unwrap();
    let detached = repo
        .get_selected_columns_filtered_with_pagination(member_name(), filter, Tracking::Detached, page)
        .await
        .unwrap();
    assert_eq!(tracked, detached);
}

#[tokio::test]
async fn test_count_is_the_whole_collection() {
    let repo = members_with(13).await;
    assert_eq!(repo.count().await.unwrap(), 13);

    let club_one = repo
        .get_all(Tracking::Detached)
        .filter(FilterCondition::eq("club_id", 1_i64))
        .count()
        .await
        .unwrap();
    assert_eq!(club_one, 7);
    assert_eq!(repo.count().await.unwrap(), 13);
}

#[tokio::test]
async fn test_delete_then_get_finds_nothing() {
    let repo = members_with(3).await;
    let member = repo.get(2).await.unwrap().unwrap();
    repo.delete(&member).await.unwrap();

    assert_eq!(repo.get(2).await.unwrap(), None);
    assert_eq!(repo.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_update_of_unknown_row_is_an_error() {
    let repo = members_with(1).await;
    let mut ghost = Member::new(1, "ghost");
    ghost.id = 999;

    let err = repo.update(&ghost).await.unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::Stale);
    assert_eq!(repo.get(999).await.unwrap(), None);
}

#[tokio::test]
async fn test_referential_integrity_across_repositories() {
    let store = MemoryStore::builder()
        .unique("clubs", "title")
        .foreign_key("members", "club_id", "clubs")
        .build();
    let clubs = GenericRepository::<Club, _>::new(store.clone());
    let members = GenericRepository::<Member, _>::new(store);

    let mut chess = Club {
        id: 0,
        title: "chess".into(),
    };
    clubs.add(&mut chess).await.unwrap();

    let mut duplicate = chess.clone();
    duplicate.id = 0;
    let err = clubs.add(&mut duplicate).await.unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::ConstraintViolation);
    assert_eq!(duplicate.id, 0);

    let mut member = Member::new(chess.id, "magnus");
    members.add(&mut member).await.unwrap();

    let err = clubs.delete(&chess).await.unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::ConstraintViolation);

    members.delete(&member).await.unwrap();
    clubs.delete(&chess).await.unwrap();
    assert_eq!(clubs.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ordering_and_narrow_lookup() {
    let repo = members_with(6).await;

    let by_name_desc: Vec<String> = repo
        .get_all(Tracking::Detached)
        .order_by("name", OrderDirection::Descending)
        .select(Selector::column::<String>("name").unwrap())
        .paginate(Page::first(2).unwrap())
        .fetch()
        .await
        .unwrap();
    assert_eq!(by_name_desc, vec!["member-005", "member-004"]);

    let snapshot = repo.get_detached(3).await.unwrap().unwrap();
    assert_eq!(snapshot.name, "member-002");
    assert!(!repo.store().tracker().is_attached("members", 3));
}

#[tokio::test]
async fn test_unknown_column_is_an_invalid_query() {
    let repo = members_with(2).await;
    let err = repo
        .get_selected_columns_filtered(
            member_name(),
            FilterCondition::eq("email", "x").into(),
            Tracking::Detached,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, RepositoryErrorKind::InvalidQuery);
    assert_eq!(err.entity_type.as_deref(), Some("Member"));
}
