mod common;

use common::{factory, fixture_db, reset_statements, statements, ACTIVE_COUNT, ARTICLE_COUNT};
use modelrepo_core::{
    Filter, Hooks, LoaderCriteria, LoaderError, Model, ModelCollectionLoader, ModelData,
    ModelDescriptor, ModelFactory, Order, ParamType, Value,
};
use std::rc::Rc;
use std::sync::Arc;

fn article_loader(conn: &rusqlite::Connection) -> ModelCollectionLoader<'_> {
    ModelCollectionLoader::for_model(conn, factory(), "article").expect("bind article model")
}

fn ids(models: &[Model]) -> Vec<i64> {
    models
        .iter()
        .map(|model| model.id().and_then(Value::as_integer).expect("integer id"))
        .collect()
}

#[test]
fn paginated_load_returns_one_page_and_total_found_rows() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    loader
        .add_filter(Filter::eq("status", "active"))
        .add_order(Order::asc("id"))
        .set_num_per_page(10)
        .set_page(1);

    let page = loader.load().expect("load first page");
    assert_eq!(page.len(), 10);
    assert_eq!(page.found_rows(), Some(ACTIVE_COUNT as u64));
    assert_eq!(ids(&page.clone().into_models()), (1..=10).collect::<Vec<_>>());

    reset_statements();
    assert_eq!(loader.found_rows().expect("memoized"), ACTIVE_COUNT as u64);
    assert_eq!(statements(), 0);
}

#[test]
fn last_page_is_partial_and_counts_follow_pagination() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    loader
        .add_filter(Filter::eq("status", "active"))
        .add_order(Order::asc("id"))
        .set_num_per_page(10)
        .set_page(3);

    let page = loader.load().expect("load last page");
    assert_eq!(ids(&page.into_models()), (21..=25).collect::<Vec<_>>());
    assert_eq!(loader.load_count().expect("page count"), 5);
    assert_eq!(loader.load_found().expect("total count"), ACTIVE_COUNT as u64);
}

#[test]
fn unpaginated_load_does_not_track_found_rows() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    loader.add_filter(Filter::eq("status", "draft"));

    reset_statements();
    let drafts = loader.load().expect("load drafts");
    assert_eq!(drafts.len() as i64, ARTICLE_COUNT - ACTIVE_COUNT);
    assert_eq!(drafts.found_rows(), None);
    assert_eq!(statements(), 1);
}

#[test]
fn found_rows_issues_the_count_query_at_most_once() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    loader.add_filter(Filter::eq("status", "active"));

    reset_statements();
    assert_eq!(loader.found_rows().expect("first"), ACTIVE_COUNT as u64);
    assert_eq!(loader.found_rows().expect("second"), ACTIVE_COUNT as u64);
    assert_eq!(statements(), 1);
}

#[test]
fn reset_only_clears_a_mutated_loader() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    assert_eq!(loader.found_rows().expect("count all"), ARTICLE_COUNT as u64);

    reset_statements();
    loader.reset();
    assert_eq!(loader.found_rows().expect("still memoized"), ARTICLE_COUNT as u64);
    assert_eq!(statements(), 0);

    loader
        .add_filter(Filter::eq("status", "active"))
        .add_order(Order::desc("id"))
        .set_num_per_page(5);
    assert!(loader.is_dirty());
    loader.reset();

    let spec = loader.criteria().spec();
    assert!(spec.filters.is_empty() && spec.orders.is_empty());
    assert!(!spec.pagination.is_limited());
    assert!(loader.has_model());

    assert_eq!(loader.found_rows().expect("recount"), ARTICLE_COUNT as u64);
    assert_eq!(statements(), 1);
}

#[test]
fn load_one_is_scoped_by_filters_without_mutating_criteria() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);

    let model = loader.load_one(7_i64).expect("load").expect("row 7 exists");
    assert_eq!(model.get("title"), Some(&Value::from("Article 07")));
    assert_eq!(model.get("rating"), Some(&Value::Real(3.5)));
    assert!(model.is_loaded());
    assert!(loader.load_one(999_i64).expect("load").is_none());

    loader.add_filter(Filter::eq("status", "draft"));
    assert!(loader.load_one(7_i64).expect("scoped load").is_none());
    assert!(loader.load_one("30").expect("text id").is_some());
    assert_eq!(loader.criteria().spec().filters.len(), 1);
}

#[test]
fn empty_identifiers_are_invalid_arguments() {
    let conn = fixture_db();
    let loader = article_loader(&conn);

    reset_statements();
    assert!(matches!(loader.load_one(""), Err(LoaderError::InvalidArgument(_))));
    assert!(matches!(loader.load_one(Value::Null), Err(LoaderError::InvalidArgument(_))));
    assert!(matches!(
        loader.load_many(Vec::<Value>::new()),
        Err(LoaderError::InvalidArgument(_))
    ));
    assert!(matches!(
        loader.load_many(["", " "]),
        Err(LoaderError::InvalidArgument(_))
    ));
    assert_eq!(statements(), 0);
}

#[test]
fn load_many_follows_input_order_in_one_query() {
    let conn = fixture_db();
    let loader = article_loader(&conn);

    reset_statements();
    let models = loader
        .load_many([Value::from(12_i64), Value::from(3_i64), Value::Null, Value::from(40_i64), Value::from(3_i64)])
        .expect("load many");
    assert_eq!(ids(&models), vec![12, 3, 40]);
    assert_eq!(statements(), 1);

    let partial = loader.load_many([5_i64, 500, 1]).expect("missing ids are skipped");
    assert_eq!(ids(&partial), vec![5, 1]);
}

#[test]
fn find_by_adds_filters_then_loads() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);

    let news = loader
        .find_by([Filter::eq("kind", "news"), Filter::eq("status", "active")], Hooks::none())
        .expect("find news");
    assert_eq!(news.ids(), vec![&Value::Integer(10), &Value::Integer(20)]);
    assert_eq!(loader.criteria().spec().filters.len(), 2);
}

#[test]
fn multi_line_queries_report_the_unpaginated_total() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);

    let page = loader
        .load_from_query(
            "SELECT SQL_CALC_FOUND_ROWS *\n  FROM articles\n  WHERE status = 'active'\nLIMIT 4",
            Hooks::none(),
        )
        .expect("tracked query");
    assert_eq!(page.len(), 4);
    assert_eq!(page.found_rows(), Some(ACTIVE_COUNT as u64));
}

#[test]
fn load_from_query_tracks_found_rows_with_binds() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);

    let page = loader
        .load_from_query(
            (
                "SELECT SQL_CALC_FOUND_ROWS * FROM articles WHERE status = ?1 ORDER BY id DESC LIMIT ?2",
                vec![Value::from("active"), Value::from("4")],
                vec![ParamType::Text, ParamType::Integer],
            ),
            Hooks::none(),
        )
        .expect("tracked query");
    assert_eq!(ids(&page.clone().into_models()), vec![25, 24, 23, 22]);
    assert_eq!(page.found_rows(), Some(ACTIVE_COUNT as u64));

    reset_statements();
    assert_eq!(loader.found_rows().expect("memoized"), ACTIVE_COUNT as u64);
    assert_eq!(statements(), 0);

    let raw = loader
        .load_from_query("SELECT * FROM articles WHERE id IN (1, 2)", Hooks::none())
        .expect("raw query");
    assert_eq!(raw.len(), 2);
    assert_eq!(raw.found_rows(), None);

    assert!(matches!(
        loader.load_from_query(("SELECT 1", vec![], vec![ParamType::Text]), Hooks::none()),
        Err(LoaderError::InvalidArgument(_))
    ));
}

#[test]
fn stored_callback_runs_unless_a_hook_overrides_it() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    loader
        .set_callback(|model: &mut Model| {
            model.set("seen", true);
        })
        .set_num_per_page(3);

    let page = loader.load().expect("load");
    assert!(page.iter().all(|model| model.get("seen") == Some(&Value::Integer(1))));
    let one = loader.load_one(1_i64).expect("load one").expect("row 1");
    assert_eq!(one.get("seen"), Some(&Value::Integer(1)));

    let before = |data: &mut ModelData| {
        data.insert("title".to_string(), Value::from("rewritten"));
    };
    let after = |model: &mut Model| {
        model.set("hook", "after");
    };
    let page = loader
        .load_with(None, Hooks::none().before(&before).after(&after))
        .expect("load with hooks");
    for model in &page {
        assert_eq!(model.get("title"), Some(&Value::from("rewritten")));
        assert_eq!(model.get("hook"), Some(&Value::from("after")));
        assert_eq!(model.get("seen"), None);
    }
}

#[test]
fn rows_without_identifier_are_skipped() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);

    let models = loader
        .load_from_query(
            "SELECT NULL AS id, title FROM articles WHERE id = 1 \
             UNION ALL SELECT id, title FROM articles WHERE id = 2",
            Hooks::none(),
        )
        .expect("query");
    assert_eq!(models.len(), 1);
    assert!(models.get(2_i64).is_some());
}

#[test]
fn dynamic_type_field_selects_model_type_per_row() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    loader
        .set_dynamic_type_field("kind")
        .add_filter(Filter::is_in("id", [9_i64, 10]))
        .add_order(Order::asc("id"));

    let models = loader.load().expect("load");
    let types = models.iter().map(Model::obj_type).collect::<Vec<_>>();
    assert_eq!(types, vec!["article", "news"]);
}

#[test]
fn unknown_dynamic_type_is_an_error() {
    let conn = fixture_db();
    conn.execute("UPDATE articles SET kind = 'podcast' WHERE id = 1", [])
        .expect("update fixture");
    let mut loader = article_loader(&conn);
    loader.set_dynamic_type_field("kind");

    assert!(matches!(
        loader.load_one(1_i64),
        Err(LoaderError::UnknownModelType(obj_type)) if obj_type == "podcast"
    ));
}

#[test]
fn selected_properties_always_include_the_key() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    loader.set_properties(["title"]).set_num_per_page(1);

    let page = loader.load().expect("load");
    let model = page.first().expect("one row");
    assert_eq!(model.data().keys().collect::<Vec<_>>(), vec!["id", "title"]);
}

#[test]
fn keywords_search_descriptor_properties() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    loader.add_keyword("Article 0");
    assert_eq!(loader.load().expect("keyword load").len(), 9);

    loader.reset();
    loader.add_keyword_in("draft", ["status"]);
    assert_eq!(loader.load().expect("scoped keyword").len() as i64, ARTICLE_COUNT - ACTIVE_COUNT);
}

#[test]
fn random_order_still_returns_every_row() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    loader.add_order(Order::Random);
    assert_eq!(loader.load().expect("load").len() as i64, ARTICLE_COUNT);
}

#[test]
fn cursor_streams_rows_once() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    loader.add_order(Order::asc("id")).set_num_per_page(4).set_page(2);

    let mut cursor = loader.cursor(Hooks::none()).expect("cursor");
    assert_eq!(cursor.found_rows(), Some(ARTICLE_COUNT as u64));

    let mut models = cursor.models().expect("first pass");
    let first = models.next().expect("row").expect("mapped");
    assert_eq!(first.id(), Some(&Value::Integer(5)));
    assert_eq!(models.count(), 3);

    assert!(matches!(cursor.models(), Err(LoaderError::InvalidState(_))));
}

#[test]
fn identified_cursor_yields_at_most_one_model() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    loader.add_filter(Filter::eq("status", "active")).set_num_per_page(4);

    {
        let mut cursor = loader.cursor_with(Some(Value::from(7_i64)), Hooks::none()).expect("cursor");
        assert_eq!(cursor.found_rows(), None);
        let models = cursor
            .models()
            .expect("rows")
            .collect::<Result<Vec<_>, _>>()
            .expect("mapped");
        assert_eq!(ids(&models), vec![7]);
    }

    {
        let mut cursor = loader.cursor_with(Some(Value::from(30_i64)), Hooks::none()).expect("cursor");
        assert_eq!(cursor.models().expect("rows").count(), 0);
    }

    assert!(matches!(
        loader.cursor_with(Some(Value::from("")), Hooks::none()),
        Err(LoaderError::InvalidArgument(_))
    ));
}

#[test]
fn cursor_applies_the_stored_callback() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    loader
        .set_callback(|model: &mut Model| {
            model.set("streamed", 1_i64);
        })
        .add_filter(Filter::eq("kind", "news"));

    let mut cursor = loader.cursor(Hooks::none()).expect("cursor");
    assert_eq!(cursor.found_rows(), None);
    let streamed = cursor
        .models()
        .expect("rows")
        .collect::<Result<Vec<_>, _>>()
        .expect("all rows mapped");
    assert_eq!(streamed.len(), 4);
    assert!(streamed
        .iter()
        .all(|model| model.get("streamed") == Some(&Value::Integer(1))));
}

#[test]
fn clone_with_keeps_wiring_and_drops_criteria() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    loader
        .set_callback(|model: &mut Model| {
            model.set("tagged", true);
        })
        .set_dynamic_type_field("kind")
        .add_filter(Filter::eq("status", "active"));

    let clone = loader.clone_with("news").expect("clone for news");
    assert_eq!(clone.model().expect("bound").obj_type(), "news");
    assert!(clone.criteria().spec().filters.is_empty());
    assert_eq!(clone.criteria().dynamic_type_field(), Some("kind"));
    assert!(Rc::ptr_eq(
        clone.criteria().callback().expect("callback"),
        loader.criteria().callback().expect("callback")
    ));

    let same = loader.clone_with(modelrepo_core::CloneWith::default()).expect("plain clone");
    assert_eq!(same.model().expect("bound").obj_type(), "article");
    assert!(same.load_one(3_i64).expect("load").is_some());
}

#[test]
fn model_binding_rules() {
    let conn = fixture_db();
    let mut loader = article_loader(&conn);
    assert!(matches!(loader.set_model("news"), Err(LoaderError::InvalidState(_))));

    let mut unbound = ModelCollectionLoader::new(&conn, factory());
    assert!(matches!(unbound.load(), Err(LoaderError::InvalidState(_))));
    assert!(matches!(
        unbound.set_model("podcast"),
        Err(LoaderError::UnknownModelType(_))
    ));
    assert!(!loader.is_dirty());
    assert!(unbound.set_model("news").is_ok());
    assert!(unbound.is_dirty());
    assert_eq!(unbound.create_model().expect("model").obj_type(), "news");
}

#[test]
fn blob_columns_are_mapped_into_model_data() {
    let conn = fixture_db();
    conn.execute_batch(
        "CREATE TABLE files (id INTEGER PRIMARY KEY, name TEXT, thumb BLOB);
         INSERT INTO files (id, name, thumb) VALUES (1, 'logo.png', X'89504E47'), (2, 'empty.txt', NULL);",
    )
    .expect("seed files");
    let files = Arc::new(ModelFactory::new().with(ModelDescriptor::new("file", "files")));
    let mut loader = ModelCollectionLoader::for_model(&conn, files, "file").expect("bind file");

    let all = loader.load().expect("load files");
    assert_eq!(all.len(), 2);
    let thumb = |id: i64| all.get(id).and_then(|model| model.get("thumb")).cloned();
    assert_eq!(thumb(1), Some(Value::Blob(vec![0x89, 0x50, 0x4E, 0x47])));
    assert_eq!(thumb(2), Some(Value::Null));

    let logo = loader.load_one(1_i64).expect("load one").expect("file 1");
    assert_eq!(logo.get("name"), Some(&Value::from("logo.png")));

    let matched = loader
        .find_by([Filter::eq("thumb", vec![0x89_u8, 0x50, 0x4E, 0x47])], Hooks::none())
        .expect("filter on blob");
    assert_eq!(matched.ids(), vec![&Value::Integer(1)]);
}
