use std::sync::{Arc, Mutex};

use keel::prelude::*;
use keel::{
    ConfigErrorKind, CustomRepository, DetachedSavePolicy, JsonLoader, ManagerConfig, Operation,
    Phase,
};

#[derive(Debug, Default, Entity)]
#[entity(
    table = "users",
    event_prefix = "user",
    pre_save = "normalize",
    post_load = "mark_loaded",
    repository = "UserRepository"
)]
struct User {
    #[column(id)]
    id: Option<i64>,

    #[column]
    name: String,

    #[column(name = "mail")]
    email: Option<String>,

    loaded: bool,

    #[has_many(key_to = "user_id", order_by = "title desc")]
    posts: Vec<EntityRef<Post>>,

    #[has_one(key_to = "user_id")]
    profile: Option<EntityRef<Profile>>,
}

impl User {
    fn normalize(&mut self, _event: &EntityEvent) -> Result<()> {
        self.name = self.name.trim().to_string();
        Ok(())
    }

    fn mark_loaded(&mut self, _event: &EntityEvent) -> Result<()> {
        self.loaded = true;
        Ok(())
    }
}

#[derive(Debug, Default, Entity)]
#[entity(table = "posts")]
struct Post {
    #[column(id)]
    id: Option<i64>,

    #[column]
    user_id: Option<i64>,

    #[column]
    title: String,

    #[belongs_to(key_from = "user_id")]
    author: Option<EntityRef<User>>,

    #[many_to_many(
        through = "post_tags",
        key_through_from = "post_id",
        key_through_to = "tag_id",
        order_by = "name"
    )]
    tags: Vec<EntityRef<Tag>>,
}

#[derive(Debug, Default, Entity)]
#[entity(table = "tags")]
struct Tag {
    #[column(id)]
    id: Option<i64>,

    #[column]
    name: String,
}

#[derive(Debug, Default, Entity)]
#[entity(table = "profiles")]
struct Profile {
    #[column(id)]
    id: Option<i64>,

    #[column]
    user_id: Option<i64>,

    #[column]
    bio: String,
}

struct UserRepository<'m>(Repository<'m, User>);

impl<'m> CustomRepository<'m> for UserRepository<'m> {
    type Entity = User;
    const NAME: &'static str = "UserRepository";

    fn from_repository(repository: Repository<'m, User>) -> Self {
        Self(repository)
    }
}

impl UserRepository<'_> {
    fn named(&mut self, name: &str) -> Result<Option<EntityRef<User>>> {
        self.0.find_one_by("name", name)
    }
}

fn connection() -> Arc<MemoryConnection> {
    let conn = Arc::new(MemoryConnection::new());
    conn.create_table("users", &["id", "name", "mail"], Some("id"));
    conn.create_table("posts", &["id", "user_id", "title"], Some("id"));
    conn.create_table("tags", &["id", "name"], Some("id"));
    conn.create_table("post_tags", &["post_id", "tag_id"], None);
    conn.create_table("profiles", &["id", "user_id", "bio"], Some("id"));
    conn
}

fn manager(conn: &Arc<MemoryConnection>) -> EntityManager {
    let connection: Arc<dyn Connection> = Arc::clone(conn) as Arc<dyn Connection>;
    EntityManager::new(connection, Arc::new(MetadataManager::new()))
}

fn user(name: &str) -> EntityRef<User> {
    entity_ref(User {
        name: name.to_string(),
        ..User::default()
    })
}

fn seed_blog(conn: &MemoryConnection) {
    for (id, name) in [(1, "Ann"), (2, "Bob")] {
        conn.seed("users", [("id", Value::BigInt(id)), ("name", name.into())])
            .unwrap();
    }
    for (id, user_id, title) in [(10, 1, "alpha"), (11, 1, "beta"), (12, 2, "gamma")] {
        conn.seed(
            "posts",
            [
                ("id", Value::BigInt(id)),
                ("user_id", Value::BigInt(user_id)),
                ("title", title.into()),
            ],
        )
        .unwrap();
    }
    for (id, name) in [(100, "rust"), (101, "orm")] {
        conn.seed("tags", [("id", Value::BigInt(id)), ("name", name.into())])
            .unwrap();
    }
    for (post_id, tag_id) in [(10, 100), (10, 101), (12, 100)] {
        conn.seed(
            "post_tags",
            [("post_id", Value::BigInt(post_id)), ("tag_id", Value::BigInt(tag_id))],
        )
        .unwrap();
    }
    conn.seed(
        "profiles",
        [
            ("id", Value::BigInt(50)),
            ("user_id", Value::BigInt(2)),
            ("bio", "hi".into()),
        ],
    )
    .unwrap();
}

#[test]
fn derived_entity_round_trip() {
    let conn = connection();
    let mut em = manager(&conn);

    let ann = entity_ref(User {
        name: "  Ann ".to_string(),
        email: Some("ann@example.com".to_string()),
        ..User::default()
    });
    assert_eq!(em.state(&ann).unwrap(), EntityState::New);

    em.save(&ann).unwrap();
    assert_eq!(ann.read().unwrap().id, Some(1));
    assert_eq!(ann.read().unwrap().name, "Ann");
    assert_eq!(em.state(&ann).unwrap(), EntityState::Managed);
    assert_eq!(
        conn.operations(),
        vec![Operation::Insert {
            table: "users".into(),
            values: vec![
                ("name".into(), Value::Text("Ann".into())),
                ("mail".into(), Value::Text("ann@example.com".into())),
            ],
        }]
    );

    ann.write().unwrap().email = None;
    em.save(&ann).unwrap();
    let rows = conn.rows("users");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_by_name("mail"), Some(&Value::Null));

    em.delete(&ann).unwrap();
    assert!(conn.rows("users").is_empty());
    assert_eq!(ann.read().unwrap().id, None);
    assert_eq!(em.state(&ann).unwrap(), EntityState::New);
}

#[test]
fn lifecycle_events_reach_framework_listeners() {
    let conn = connection();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for phase in Phase::ALL {
        let seen = Arc::clone(&seen);
        conn.dispatcher()
            .listen(format!("user.{}", phase), move |name: &str, _: &mut dyn Event| {
                seen.lock().unwrap().push(name.to_string());
            });
    }
    let mut em = manager(&conn);

    let ann = user("Ann");
    em.save(&ann).unwrap();
    em.save(&ann).unwrap();
    em.delete(&ann).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "user.preSave",
            "user.preCreate",
            "user.postCreate",
            "user.postSave",
            "user.preSave",
            "user.preUpdate",
            "user.postUpdate",
            "user.postSave",
            "user.preDelete",
            "user.postDelete",
        ]
    );
}

#[test]
fn listener_veto_aborts_save() {
    let conn = connection();
    conn.dispatcher()
        .listen("user.preCreate", |_: &str, event: &mut dyn Event| {
            if let Some(event) = event.downcast_mut::<EntityEvent>() {
                event.veto("registration is closed");
            }
        });
    let mut em = manager(&conn);

    let err = em.save(&user("Ann")).unwrap_err();
    assert_eq!(err.to_string(), "registration is closed");
    assert!(conn.rows("users").is_empty());
}

#[test]
fn identity_map_and_post_load() {
    let conn = connection();
    seed_blog(&conn);
    let mut em = manager(&conn);

    let ann = em.find::<User>(1).unwrap().unwrap();
    assert!(ann.read().unwrap().loaded);
    assert_eq!(em.state(&ann).unwrap(), EntityState::Managed);

    conn.clear_log();
    let again = em.find::<User>(1).unwrap().unwrap();
    assert!(Arc::ptr_eq(&ann, &again));
    assert_eq!(conn.query_calls(), 0);

    let everyone = em.repository::<User>().unwrap().find_all().unwrap();
    assert_eq!(everyone.len(), 2);
    assert!(Arc::ptr_eq(&everyone[0], &ann));

    // a second manager does not know the instance
    let mut other = manager(&conn);
    assert_eq!(other.state(&ann).unwrap(), EntityState::Detached);
    let err = other.save(&ann).unwrap_err();
    assert_eq!(err.invalid_state(), Some("detached"));
}

#[test]
fn detached_insert_policy() {
    let conn = connection();
    let connection: Arc<dyn Connection> = Arc::clone(&conn) as Arc<dyn Connection>;
    let mut em = EntityManager::with_config(
        connection,
        Arc::new(MetadataManager::new()),
        ManagerConfig::new().detached_save(DetachedSavePolicy::Insert),
    );

    let imported = entity_ref(User {
        id: Some(42),
        name: "Imported".to_string(),
        ..User::default()
    });
    assert_eq!(em.state(&imported).unwrap(), EntityState::Detached);

    em.save(&imported).unwrap();
    assert_eq!(em.state(&imported).unwrap(), EntityState::Managed);
    assert_eq!(conn.rows("users")[0].get_by_name("id"), Some(&Value::BigInt(42)));
}

#[test]
fn relations_load_in_batches() {
    let conn = connection();
    seed_blog(&conn);
    let mut em = manager(&conn);

    let users = em.repository::<User>().unwrap().find_all().unwrap();
    conn.clear_log();

    em.related::<User, Post>(&users, "posts").unwrap();
    em.related::<User, Profile>(&users, "profile").unwrap();
    assert_eq!(conn.query_calls(), 2);

    let ann = users[0].read().unwrap();
    let titles: Vec<String> = ann
        .posts
        .iter()
        .map(|p| p.read().unwrap().title.clone())
        .collect();
    assert_eq!(titles, vec!["beta", "alpha"]);
    assert!(ann.profile.is_none());

    let bob = users[1].read().unwrap();
    assert_eq!(bob.posts.len(), 1);
    let profile = bob.profile.as_ref().unwrap();
    assert_eq!(profile.read().unwrap().bio, "hi");
}

#[test]
fn belongs_to_and_many_to_many_share_instances() {
    let conn = connection();
    seed_blog(&conn);
    let mut em = manager(&conn);

    let ann = em.find::<User>(1).unwrap().unwrap();
    let posts = em.repository::<Post>().unwrap().find_all().unwrap();
    em.related::<Post, User>(&posts, "author").unwrap();
    em.related::<Post, Tag>(&posts, "tags").unwrap();

    let first = posts[0].read().unwrap();
    assert!(Arc::ptr_eq(first.author.as_ref().unwrap(), &ann));
    let tags: Vec<String> = first
        .tags
        .iter()
        .map(|t| t.read().unwrap().name.clone())
        .collect();
    assert_eq!(tags, vec!["orm", "rust"]);

    assert!(posts[1].read().unwrap().tags.is_empty());

    let third = posts[2].read().unwrap();
    assert!(Arc::ptr_eq(&first.tags[1], &third.tags[0]));
}

#[test]
fn relation_target_type_must_match() {
    let conn = connection();
    seed_blog(&conn);
    let mut em = manager(&conn);

    let users = em.repository::<User>().unwrap().find_all().unwrap();
    let err = em.related::<User, Profile>(&users, "posts").unwrap_err();
    assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownRelation));

    let err = em.related::<User, Post>(&users, "comments").unwrap_err();
    assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownRelation));
}

#[test]
fn custom_repository_is_checked_against_mapping() {
    let conn = connection();
    seed_blog(&conn);
    let mut em = manager(&conn);

    let mut users = em.custom_repository::<UserRepository<'_>>().unwrap();
    let bob = users.named("Bob").unwrap().unwrap();
    assert_eq!(bob.read().unwrap().id, Some(2));
    assert!(users.named("Zed").unwrap().is_none());
}

#[test]
fn json_mapping_overrides_declaration() {
    let conn = Arc::new(MemoryConnection::new());
    conn.create_table("people", &["pk", "name"], Some("pk"));

    let loader = JsonLoader::from_str(
        r#"{
            "Tag": {
                "table": "people",
                "fields": [
                    {"name": "id", "column": "pk", "id": true},
                    {"name": "name"}
                ]
            }
        }"#,
    )
    .unwrap();
    let connection: Arc<dyn Connection> = Arc::clone(&conn) as Arc<dyn Connection>;
    let mut em = EntityManager::new(connection, Arc::new(MetadataManager::with_loader(loader)));

    let tag = entity_ref(Tag {
        name: "Ann".to_string(),
        ..Tag::default()
    });
    em.save(&tag).unwrap();
    assert_eq!(tag.read().unwrap().id, Some(1));
    assert_eq!(conn.rows("people")[0].get_by_name("pk"), Some(&Value::BigInt(1)));

    let err = em.save(&user("Ann")).unwrap_err();
    assert_eq!(err.config_kind(), Some(ConfigErrorKind::NotAnEntity));
}
